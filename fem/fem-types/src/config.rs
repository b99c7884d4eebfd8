//! Configuration types for static analysis.
//!
//! This module provides the settings that control how an analysis advances
//! along the equilibrium path: load-control stepping, arc-length
//! continuation, convergence testing and DOF numbering.

use crate::error::FemError;
use crate::tags::{ElementTag, NodeTag};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Settings for fixed or adaptive load-factor stepping.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LoadControlConfig {
    /// Load-factor increment applied each step.
    pub increment: f64,
    /// Smallest increment adaptive stepping may choose.
    pub min_increment: f64,
    /// Largest increment adaptive stepping may choose.
    pub max_increment: f64,
    /// Desired Newton iterations per step. `None` disables adaptive stepping.
    pub target_iterations: Option<usize>,
}

impl Default for LoadControlConfig {
    fn default() -> Self {
        Self {
            increment: 0.1,
            min_increment: 0.1,
            max_increment: 0.1,
            target_iterations: None,
        }
    }
}

impl LoadControlConfig {
    /// Fixed increment, no adaptation.
    #[must_use]
    pub fn fixed(increment: f64) -> Self {
        Self {
            increment,
            min_increment: increment,
            max_increment: increment,
            target_iterations: None,
        }
    }

    /// Adaptive increment rescaled by `target / last` iterations.
    #[must_use]
    pub fn adaptive(increment: f64, target_iterations: usize, min: f64, max: f64) -> Self {
        Self {
            increment,
            min_increment: min,
            max_increment: max,
            target_iterations: Some(target_iterations),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.increment.is_finite() || self.increment == 0.0 {
            return Err(FemError::invalid_config(format!(
                "load increment must be finite and non-zero, got {}",
                self.increment
            )));
        }
        if self.min_increment.abs() > self.max_increment.abs() {
            return Err(FemError::invalid_config(
                "min increment exceeds max increment",
            ));
        }
        if self.target_iterations == Some(0) {
            return Err(FemError::invalid_config(
                "target iteration count must be positive",
            ));
        }
        Ok(())
    }
}

/// Load-factor correction rule used by arc-length continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ArcLengthStrategy {
    /// Minimize the norm of the residual displacement.
    MinimumResidualDisplacement,
    /// Iterate on the hyperplane normal to the predictor.
    NormalPlane,
    /// Iterate on the hyperplane normal to the current secant.
    UpdatedNormalPlane,
    /// Stay on the hypersphere of the configured radius (quadratic).
    Cylindrical,
    /// Minimum-norm correction in the combined (load, displacement) space.
    ModifiedNormalFlow,
    /// Generalized displacement control, reusing the previous step direction.
    GeneralizedDisplacementControl,
    /// Updated normal plane that also pulls the secant back to the radius.
    ModifiedUpdatedNormalPlane,
    /// Normal plane along the predictor tangent, no per-iteration re-solve.
    SimplifiedNormalPlane,
    /// Normal plane measured only over a local set of DOFs.
    Local,
}

impl ArcLengthStrategy {
    /// All strategies, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::MinimumResidualDisplacement,
        Self::NormalPlane,
        Self::UpdatedNormalPlane,
        Self::Cylindrical,
        Self::ModifiedNormalFlow,
        Self::GeneralizedDisplacementControl,
        Self::ModifiedUpdatedNormalPlane,
        Self::SimplifiedNormalPlane,
        Self::Local,
    ];

    /// Short rule name used in logs and errors.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::MinimumResidualDisplacement => "minimum residual displacement",
            Self::NormalPlane => "normal plane",
            Self::UpdatedNormalPlane => "updated normal plane",
            Self::Cylindrical => "cylindrical arc-length",
            Self::ModifiedNormalFlow => "modified normal flow",
            Self::GeneralizedDisplacementControl => "generalized displacement control",
            Self::ModifiedUpdatedNormalPlane => "modified updated normal plane",
            Self::SimplifiedNormalPlane => "simplified normal plane",
            Self::Local => "local",
        }
    }

    /// Whether the rule needs the reference-load solve `uq` every iteration.
    #[must_use]
    pub fn resolves_reference(self) -> bool {
        !matches!(self, Self::SimplifiedNormalPlane)
    }
}

/// DOFs that measure the local arc length.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LocalControl {
    /// Explicit `(node, dof)` pairs.
    Dofs(Vec<(NodeTag, usize)>),
    /// Every DOF of every node connected to one element.
    Element(ElementTag),
}

/// Settings for arc-length continuation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ArcLengthConfig {
    /// Target arc length of each step.
    pub arc_length: f64,
    /// Load-factor correction rule.
    pub strategy: ArcLengthStrategy,
    /// Weight ψ of the load factor in the arc-length norm
    /// `sqrt(ΔU·ΔU + ψ²Δλ²)`. `0` gives the pure cylindrical constraint.
    pub load_scale: f64,
    /// Control DOFs for [`ArcLengthStrategy::Local`].
    pub local_control: Option<LocalControl>,
}

impl Default for ArcLengthConfig {
    fn default() -> Self {
        Self {
            arc_length: 0.1,
            strategy: ArcLengthStrategy::Cylindrical,
            load_scale: 1.0,
            local_control: None,
        }
    }
}

impl ArcLengthConfig {
    /// Arc-length settings with the given radius and rule.
    #[must_use]
    pub fn new(arc_length: f64, strategy: ArcLengthStrategy) -> Self {
        Self {
            arc_length,
            strategy,
            ..Default::default()
        }
    }

    /// Set the load-factor weight ψ.
    #[must_use]
    pub fn with_load_scale(mut self, load_scale: f64) -> Self {
        self.load_scale = load_scale;
        self
    }

    /// Set the local control DOFs (switches to the local rule).
    #[must_use]
    pub fn with_local_control(mut self, control: LocalControl) -> Self {
        self.local_control = Some(control);
        self.strategy = ArcLengthStrategy::Local;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.arc_length.is_finite() || self.arc_length <= 0.0 {
            return Err(FemError::invalid_config(format!(
                "arc length must be positive and finite, got {}",
                self.arc_length
            )));
        }
        if !self.load_scale.is_finite() || self.load_scale < 0.0 {
            return Err(FemError::invalid_config(format!(
                "load scale must be non-negative, got {}",
                self.load_scale
            )));
        }
        if self.strategy == ArcLengthStrategy::Local {
            match &self.local_control {
                None => {
                    return Err(FemError::invalid_config(
                        "local arc-length rule requires control DOFs",
                    ));
                }
                Some(LocalControl::Dofs(dofs)) if dofs.is_empty() => {
                    return Err(FemError::invalid_config("local control DOF list is empty"));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Norm used to decide convergence of a Newton iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConvergenceKind {
    /// Euclidean norm of the displacement increment.
    DisplacementIncrement,
    /// Euclidean norm of the unbalanced force.
    Unbalance,
    /// Half the absolute product of increment and unbalance.
    EnergyIncrement,
}

/// Convergence test settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConvergenceConfig {
    /// Which norm is tested.
    pub kind: ConvergenceKind,
    /// Convergence tolerance.
    pub tolerance: f64,
    /// Iteration budget per step.
    pub max_iterations: usize,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            kind: ConvergenceKind::DisplacementIncrement,
            tolerance: 1e-8,
            max_iterations: 25,
        }
    }
}

impl ConvergenceConfig {
    /// Displacement-increment test.
    #[must_use]
    pub fn displacement(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            kind: ConvergenceKind::DisplacementIncrement,
            tolerance,
            max_iterations,
        }
    }

    /// Unbalanced-force test.
    #[must_use]
    pub fn unbalance(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            kind: ConvergenceKind::Unbalance,
            tolerance,
            max_iterations,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(FemError::invalid_config(format!(
                "convergence tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(FemError::invalid_config("iteration budget must be positive"));
        }
        Ok(())
    }
}

/// Equation numbering scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Numberer {
    /// Ascending node tag order.
    #[default]
    Plain,
    /// Reverse Cuthill-McKee over the node adjacency graph.
    ReverseCuthillMcKee,
}

/// Settings for the static analysis driver.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AnalysisConfig {
    /// Convergence test for each step.
    pub convergence: ConvergenceConfig,
    /// Equation numbering scheme.
    pub numberer: Numberer,
    /// How many times a failed step may be retried with a smaller increment.
    pub max_step_cuts: usize,
    /// Factor applied to the increment on each retry.
    pub step_cut_factor: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            convergence: ConvergenceConfig::default(),
            numberer: Numberer::Plain,
            max_step_cuts: 0,
            step_cut_factor: 0.5,
        }
    }
}

impl AnalysisConfig {
    /// Set the convergence test.
    #[must_use]
    pub fn with_convergence(mut self, convergence: ConvergenceConfig) -> Self {
        self.convergence = convergence;
        self
    }

    /// Set the numbering scheme.
    #[must_use]
    pub fn with_numberer(mut self, numberer: Numberer) -> Self {
        self.numberer = numberer;
        self
    }

    /// Allow failed steps to be retried with a reduced increment.
    #[must_use]
    pub fn with_step_cuts(mut self, max_step_cuts: usize, factor: f64) -> Self {
        self.max_step_cuts = max_step_cuts;
        self.step_cut_factor = factor;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        self.convergence.validate()?;
        if !(self.step_cut_factor > 0.0 && self.step_cut_factor < 1.0) {
            return Err(FemError::invalid_config(format!(
                "step cut factor must be in (0, 1), got {}",
                self.step_cut_factor
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_load_control_validation() {
        assert!(LoadControlConfig::fixed(1.0).validate().is_ok());
        assert!(LoadControlConfig::fixed(0.0).validate().is_err());
        assert!(LoadControlConfig::adaptive(0.1, 0, 0.01, 1.0).validate().is_err());
        assert!(LoadControlConfig::adaptive(0.1, 4, 1.0, 0.01).validate().is_err());
    }

    #[test]
    fn test_arc_length_validation() {
        assert!(ArcLengthConfig::default().validate().is_ok());
        assert!(
            ArcLengthConfig::new(-1.0, ArcLengthStrategy::NormalPlane)
                .validate()
                .is_err()
        );
        let local = ArcLengthConfig::new(0.5, ArcLengthStrategy::Local);
        assert!(local.validate().is_err());

        let local = ArcLengthConfig::new(0.5, ArcLengthStrategy::NormalPlane)
            .with_local_control(LocalControl::Dofs(vec![(NodeTag(2), 1)]));
        assert_eq!(local.strategy, ArcLengthStrategy::Local);
        assert!(local.validate().is_ok());
    }

    #[test]
    fn test_strategy_names_unique() {
        let mut names: Vec<_> = ArcLengthStrategy::ALL.iter().map(|s| s.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ArcLengthStrategy::ALL.len());
        assert!(!ArcLengthStrategy::SimplifiedNormalPlane.resolves_reference());
    }

    #[test]
    fn test_analysis_config() {
        let config = AnalysisConfig::default().with_step_cuts(3, 0.5);
        assert!(config.validate().is_ok());
        let config = AnalysisConfig::default().with_step_cuts(3, 1.5);
        assert!(config.validate().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_config_serde_roundtrip() {
        let config = ArcLengthConfig::new(0.25, ArcLengthStrategy::GeneralizedDisplacementControl);
        let json = serde_json::to_string(&config).unwrap();
        let back: ArcLengthConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
