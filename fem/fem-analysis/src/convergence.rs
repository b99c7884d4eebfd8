//! Convergence tests for the Newton iterations of a step.
//!
//! The residual-based test ([`ConvergenceKind::Unbalance`]) is checked on
//! the unbalance formed before each solve; the increment-based tests
//! ([`ConvergenceKind::DisplacementIncrement`],
//! [`ConvergenceKind::EnergyIncrement`]) after each correction.

use nalgebra::DVector;

use fem_types::{ConvergenceConfig, ConvergenceKind, FemError};

/// Convergence test state for one step.
#[derive(Debug, Clone)]
pub struct ConvergenceTest {
    config: ConvergenceConfig,
    norms: Vec<f64>,
}

impl ConvergenceTest {
    /// Test with the given settings.
    #[must_use]
    pub fn new(config: ConvergenceConfig) -> Self {
        let norms = Vec::with_capacity(config.max_iterations);
        Self { config, norms }
    }

    /// Settings.
    #[must_use]
    pub fn config(&self) -> &ConvergenceConfig {
        &self.config
    }

    /// Forget the norms of the previous step.
    pub fn start(&mut self) {
        self.norms.clear();
    }

    /// Check the unbalance `r` formed before a solve.
    ///
    /// Always `false` for increment-based tests.
    pub fn check_unbalance(&mut self, r: &DVector<f64>) -> fem_types::Result<bool> {
        if self.config.kind != ConvergenceKind::Unbalance {
            return Ok(false);
        }
        let norm = finite(r.norm(), "unbalance norm")?;
        self.norms.push(norm);
        Ok(norm <= self.config.tolerance)
    }

    /// Check the increment `du` applied for the unbalance `r`.
    ///
    /// Always `false` for the residual-based test.
    pub fn check_increment(&mut self, du: &DVector<f64>, r: &DVector<f64>) -> fem_types::Result<bool> {
        let norm = match self.config.kind {
            ConvergenceKind::Unbalance => return Ok(false),
            ConvergenceKind::DisplacementIncrement => du.norm(),
            ConvergenceKind::EnergyIncrement => 0.5 * du.dot(r).abs(),
        };
        let norm = finite(norm, "increment norm")?;
        self.norms.push(norm);
        Ok(norm <= self.config.tolerance)
    }

    /// Norms recorded in this step, oldest first.
    #[must_use]
    pub fn norms(&self) -> &[f64] {
        &self.norms
    }

    /// Last recorded norm, or infinity before the first check.
    #[must_use]
    pub fn last_norm(&self) -> f64 {
        self.norms.last().copied().unwrap_or(f64::INFINITY)
    }

    /// The error reported when the iteration budget runs out.
    #[must_use]
    pub fn unconverged(&self, iterations: usize) -> FemError {
        FemError::Unconverged {
            iterations,
            norm: self.last_norm(),
        }
    }
}

fn finite(value: f64, context: &'static str) -> fem_types::Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(FemError::NonFinite { context })
    }
}
