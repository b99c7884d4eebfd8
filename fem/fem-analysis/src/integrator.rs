//! Equilibrium-path controller interface.
//!
//! A [`StaticIntegrator`] advances the domain along its equilibrium path one
//! increment at a time. The driver calls, per step:
//!
//! 1. [`StaticIntegrator::new_step`] once, to apply the predictor
//! 2. [`StaticIntegrator::update`] once per Newton iteration, with the
//!    solution of the residual system
//! 3. [`StaticIntegrator::commit`] when converged, or
//!    [`StaticIntegrator::revert`] when the step failed
//!
//! The load factor is the domain's pseudo-time: every increment is applied
//! through [`Domain::apply_load`], and a committed step leaves
//! [`Domain::committed_time`] equal to the integrator's load factor.

use nalgebra::DVector;

use fem_domain::Domain;
use fem_types::FemError;

use crate::linear_system::LinearSystem;
use crate::model::AnalysisModel;

/// Lifecycle of an integrator within one increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegratorState {
    /// No step in progress.
    #[default]
    Idle,
    /// Predictor applied, iterating.
    StepInProgress,
    /// Last update converged; waiting for commit.
    Converged,
    /// The step failed; waiting for revert.
    Failed,
}

/// Collaborators an integrator works on during one call.
pub struct IntegratorContext<'a> {
    /// Domain being advanced.
    pub domain: &'a mut Domain,
    /// Current equation numbering.
    pub model: &'a AnalysisModel,
    /// Linear system holding the tangent of the current iteration.
    pub system: &'a mut dyn LinearSystem,
}

impl<'a> IntegratorContext<'a> {
    /// Bundle the collaborators.
    pub fn new(
        domain: &'a mut Domain,
        model: &'a AnalysisModel,
        system: &'a mut dyn LinearSystem,
    ) -> Self {
        Self {
            domain,
            model,
            system,
        }
    }

    /// Assemble the tangent at the current trial state.
    pub fn form_tangent(&mut self) -> fem_types::Result<()> {
        self.model.form_tangent(self.domain, self.system)
    }

    /// Solve the current tangent against `rhs`.
    pub fn solve_for(&mut self, rhs: &DVector<f64>) -> fem_types::Result<DVector<f64>> {
        self.system.set_b(rhs)?;
        self.system.solve()?;
        Ok(self.system.x().clone())
    }

    /// Apply the loads at `load_factor`.
    pub fn apply_load(&mut self, load_factor: f64) -> fem_types::Result<()> {
        self.domain.apply_load(load_factor)
    }

    /// Add `du` to the trial displacements and update the elements.
    pub fn incr_disp(&mut self, du: &DVector<f64>) -> fem_types::Result<()> {
        self.model.incr_disp(self.domain, du)
    }

    /// Reference load `phat = R(λ + 1) - R(λ)` at the current trial state.
    ///
    /// The load factor is restored before returning.
    pub fn reference_load(&mut self, load_factor: f64) -> fem_types::Result<DVector<f64>> {
        self.domain.apply_load(load_factor + 1.0)?;
        let shifted = self.model.unbalance(self.domain)?;
        self.domain.apply_load(load_factor)?;
        let base = self.model.unbalance(self.domain)?;
        let phat = shifted - base;
        if phat.iter().all(|v| *v == 0.0) {
            return Err(FemError::ZeroReferenceLoad);
        }
        Ok(phat)
    }
}

/// Static equilibrium-path controller.
pub trait StaticIntegrator {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Recompute size-dependent working vectors (and the reference load)
    /// after the equation numbering changed.
    fn domain_changed(&mut self, ctx: &mut IntegratorContext<'_>) -> fem_types::Result<()>;

    /// Compute and apply the step predictor.
    fn new_step(&mut self, ctx: &mut IntegratorContext<'_>) -> fem_types::Result<()>;

    /// Apply the correction for the residual solution `ur` and return the
    /// displacement increment for the convergence test.
    ///
    /// The tangent of the current iteration is factored in `ctx.system`.
    fn update(
        &mut self,
        ctx: &mut IntegratorContext<'_>,
        ur: &DVector<f64>,
    ) -> fem_types::Result<DVector<f64>>;

    /// Mark the current iteration as converged.
    fn converged(&mut self);

    /// Commit the domain and accept the step.
    fn commit(&mut self, ctx: &mut IntegratorContext<'_>) -> fem_types::Result<()>;

    /// Revert the domain to its last commit and discard the step.
    fn revert(&mut self, ctx: &mut IntegratorContext<'_>) -> fem_types::Result<()>;

    /// Current lifecycle state.
    fn state(&self) -> IntegratorState;

    /// Trial load factor.
    fn load_factor(&self) -> f64;

    /// Newton iterations of the current (or last) step.
    fn iterations(&self) -> usize;

    /// Scale the next step size by `factor` (step cutting).
    fn scale_step(&mut self, factor: f64);
}

/// Fail with [`FemError::InvalidState`] unless `state` matches `expected`.
pub(crate) fn expect_state(
    name: &str,
    state: IntegratorState,
    expected: IntegratorState,
    operation: &str,
) -> fem_types::Result<()> {
    if state == expected {
        Ok(())
    } else {
        Err(FemError::invalid_state(format!(
            "{name}: {operation} called in state {state:?}, expected {expected:?}"
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::linear_system::DenseSystem;
    use approx::assert_relative_eq;
    use fem_constraint::SingleFreedomConstraint;
    use fem_domain::{LoadPattern, NodalLoad, Node, TimeSeries, Truss};
    use fem_types::{ConstraintTag, ElementTag, LoadTag, NodeTag, Numberer, PatternTag};

    fn loaded_bar(load: f64) -> Domain {
        let mut domain = Domain::new();
        domain.add_node(Node::new(NodeTag(1), &[0.0], 1).unwrap()).unwrap();
        domain.add_node(Node::new(NodeTag(2), &[2.0], 1).unwrap()).unwrap();
        domain
            .add_element(Truss::new(ElementTag(1), [NodeTag(1), NodeTag(2)], 1.0, 4.0).unwrap())
            .unwrap();
        domain
            .add_sp(SingleFreedomConstraint::fixed(ConstraintTag(1), NodeTag(1), 0))
            .unwrap();
        domain
            .add_load_pattern(LoadPattern::new(PatternTag(1), TimeSeries::default()))
            .unwrap();
        domain
            .add_nodal_load(PatternTag(1), NodalLoad::new(LoadTag(1), NodeTag(2), vec![load]))
            .unwrap();
        domain
    }

    #[test]
    fn test_reference_load_restores_factor() {
        let mut domain = loaded_bar(3.0);
        let model = AnalysisModel::build(&mut domain, Numberer::Plain).unwrap();
        let mut system = DenseSystem::default();
        let mut ctx = IntegratorContext::new(&mut domain, &model, &mut system);
        let phat = ctx.reference_load(0.5).unwrap();
        assert_eq!(phat.as_slice(), &[3.0]);
        assert_eq!(domain.current_time(), 0.5);
        assert_eq!(domain.node(NodeTag(2)).unwrap().unbalanced_load()[0], 1.5);
    }

    #[test]
    fn test_zero_reference_load() {
        let mut domain = loaded_bar(0.0);
        let model = AnalysisModel::build(&mut domain, Numberer::Plain).unwrap();
        let mut system = DenseSystem::default();
        let mut ctx = IntegratorContext::new(&mut domain, &model, &mut system);
        let err = ctx.reference_load(0.0).unwrap_err();
        assert_eq!(err, FemError::ZeroReferenceLoad);
    }

    #[test]
    fn test_solve_for_uses_tangent() {
        let mut domain = loaded_bar(1.0);
        let model = AnalysisModel::build(&mut domain, Numberer::Plain).unwrap();
        let mut system = DenseSystem::default();
        let mut ctx = IntegratorContext::new(&mut domain, &model, &mut system);
        ctx.form_tangent().unwrap();
        let x = ctx.solve_for(&DVector::from_vec(vec![4.0])).unwrap();
        // EA/L = 2
        assert_relative_eq!(x[0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_expect_state() {
        assert!(expect_state("x", IntegratorState::Idle, IntegratorState::Idle, "new_step").is_ok());
        let err = expect_state(
            "x",
            IntegratorState::Failed,
            IntegratorState::Idle,
            "new_step",
        )
        .unwrap_err();
        assert_eq!(err.status_code(), -2);
    }
}
