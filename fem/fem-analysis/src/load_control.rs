//! Load-factor stepping.
//!
//! [`LoadControl`] advances the load factor by a fixed increment. With a
//! target iteration count the increment adapts between steps:
//!
//! ```text
//! Δλ ← Δλ · target / last,   clamped to [min, max]
//! ```
//!
//! so steps that converge quickly grow and steps that struggle shrink. The
//! increment adapts once per committed step; retries of a failed step only
//! see the step cut.

use nalgebra::DVector;
use tracing::debug;

use fem_types::LoadControlConfig;

use crate::integrator::{IntegratorContext, IntegratorState, StaticIntegrator, expect_state};

/// Fixed or adaptive load-factor stepping.
#[derive(Debug, Clone)]
pub struct LoadControl {
    config: LoadControlConfig,
    increment: f64,
    load_factor: f64,
    iterations: usize,
    last_iterations: usize,
    state: IntegratorState,
}

impl LoadControl {
    /// Integrator for the given (validated) settings.
    pub fn new(config: LoadControlConfig) -> fem_types::Result<Self> {
        config.validate()?;
        Ok(Self {
            increment: config.increment,
            config,
            load_factor: 0.0,
            iterations: 0,
            last_iterations: 0,
            state: IntegratorState::Idle,
        })
    }

    /// Settings.
    #[must_use]
    pub fn config(&self) -> &LoadControlConfig {
        &self.config
    }

    /// Increment the next step will apply.
    #[must_use]
    pub fn increment(&self) -> f64 {
        self.increment
    }

    fn adapt(&mut self) {
        let Some(target) = self.config.target_iterations else {
            return;
        };
        if self.last_iterations == 0 {
            return;
        }
        let factor = target as f64 / self.last_iterations as f64;
        let (min, max) = (self.config.min_increment.abs(), self.config.max_increment.abs());
        let magnitude = (self.increment.abs() * factor).clamp(min, max);
        self.increment = magnitude.copysign(self.increment);
    }
}

impl StaticIntegrator for LoadControl {
    fn name(&self) -> &'static str {
        "load control"
    }

    fn domain_changed(&mut self, _ctx: &mut IntegratorContext<'_>) -> fem_types::Result<()> {
        Ok(())
    }

    fn new_step(&mut self, ctx: &mut IntegratorContext<'_>) -> fem_types::Result<()> {
        expect_state(self.name(), self.state, IntegratorState::Idle, "new_step")?;
        self.load_factor = ctx.domain.committed_time() + self.increment;
        self.iterations = 0;
        self.state = IntegratorState::StepInProgress;
        if let Err(err) = ctx.apply_load(self.load_factor) {
            self.state = IntegratorState::Failed;
            return Err(err);
        }
        debug!(
            load_factor = self.load_factor,
            increment = self.increment,
            "load control predictor"
        );
        Ok(())
    }

    fn update(
        &mut self,
        ctx: &mut IntegratorContext<'_>,
        ur: &DVector<f64>,
    ) -> fem_types::Result<DVector<f64>> {
        expect_state(self.name(), self.state, IntegratorState::StepInProgress, "update")?;
        self.iterations += 1;
        if let Err(err) = ctx.incr_disp(ur) {
            self.state = IntegratorState::Failed;
            return Err(err);
        }
        Ok(ur.clone())
    }

    fn converged(&mut self) {
        if self.state == IntegratorState::StepInProgress {
            self.state = IntegratorState::Converged;
        }
    }

    fn commit(&mut self, ctx: &mut IntegratorContext<'_>) -> fem_types::Result<()> {
        expect_state(self.name(), self.state, IntegratorState::Converged, "commit")?;
        ctx.domain.commit();
        self.last_iterations = self.iterations;
        self.adapt();
        self.state = IntegratorState::Idle;
        Ok(())
    }

    fn revert(&mut self, ctx: &mut IntegratorContext<'_>) -> fem_types::Result<()> {
        ctx.domain.revert_to_last_commit();
        self.load_factor = ctx.domain.committed_time();
        self.state = IntegratorState::Idle;
        ctx.apply_load(self.load_factor)?;
        ctx.domain.update()
    }

    fn state(&self) -> IntegratorState {
        self.state
    }

    fn load_factor(&self) -> f64 {
        self.load_factor
    }

    fn iterations(&self) -> usize {
        self.iterations
    }

    fn scale_step(&mut self, factor: f64) {
        self.increment *= factor;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::linear_system::{DenseSystem, LinearSystem};
    use crate::model::AnalysisModel;
    use approx::assert_relative_eq;
    use fem_constraint::SingleFreedomConstraint;
    use fem_domain::{Domain, LoadPattern, NodalLoad, Node, TimeSeries, Truss};
    use fem_types::{ConstraintTag, ElementTag, LoadTag, NodeTag, Numberer, PatternTag};

    fn bar() -> Domain {
        let mut domain = Domain::new();
        domain.add_node(Node::new(NodeTag(1), &[0.0], 1).unwrap()).unwrap();
        domain.add_node(Node::new(NodeTag(2), &[1.0], 1).unwrap()).unwrap();
        domain
            .add_element(Truss::new(ElementTag(1), [NodeTag(1), NodeTag(2)], 1.0, 50.0).unwrap())
            .unwrap();
        domain
            .add_sp(SingleFreedomConstraint::fixed(ConstraintTag(1), NodeTag(1), 0))
            .unwrap();
        domain
            .add_load_pattern(LoadPattern::new(PatternTag(1), TimeSeries::default()))
            .unwrap();
        domain
            .add_nodal_load(PatternTag(1), NodalLoad::new(LoadTag(1), NodeTag(2), vec![10.0]))
            .unwrap();
        domain
    }

    #[test]
    fn test_one_linear_step() {
        let mut domain = bar();
        let model = AnalysisModel::build(&mut domain, Numberer::Plain).unwrap();
        let mut system = DenseSystem::default();
        let mut integrator = LoadControl::new(LoadControlConfig::fixed(0.5)).unwrap();

        let mut ctx = IntegratorContext::new(&mut domain, &model, &mut system);
        integrator.new_step(&mut ctx).unwrap();
        assert_eq!(integrator.state(), IntegratorState::StepInProgress);

        ctx.model.form_unbalance(ctx.domain, ctx.system).unwrap();
        ctx.form_tangent().unwrap();
        ctx.system.solve().unwrap();
        let ur = ctx.system.x().clone();
        let du = integrator.update(&mut ctx, &ur).unwrap();
        assert_relative_eq!(du[0], 0.1, epsilon = 1e-12);

        integrator.converged();
        integrator.commit(&mut ctx).unwrap();
        assert_eq!(integrator.state(), IntegratorState::Idle);
        assert_eq!(domain.committed_time(), 0.5);
        assert_relative_eq!(domain.node(NodeTag(2)).unwrap().committed_disp()[0], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_revert_restores_committed_factor() {
        let mut domain = bar();
        let model = AnalysisModel::build(&mut domain, Numberer::Plain).unwrap();
        let mut system = DenseSystem::default();
        let mut integrator = LoadControl::new(LoadControlConfig::fixed(1.0)).unwrap();
        let mut ctx = IntegratorContext::new(&mut domain, &model, &mut system);
        integrator.new_step(&mut ctx).unwrap();
        integrator
            .update(&mut ctx, &DVector::from_vec(vec![0.3]))
            .unwrap();
        integrator.revert(&mut ctx).unwrap();
        assert_eq!(integrator.load_factor(), 0.0);
        assert_eq!(domain.node(NodeTag(2)).unwrap().trial_disp()[0], 0.0);
        assert_eq!(domain.node(NodeTag(2)).unwrap().unbalanced_load()[0], 0.0);
    }

    #[test]
    fn test_commit_requires_convergence() {
        let mut domain = bar();
        let model = AnalysisModel::build(&mut domain, Numberer::Plain).unwrap();
        let mut system = DenseSystem::default();
        let mut integrator = LoadControl::new(LoadControlConfig::fixed(1.0)).unwrap();
        let mut ctx = IntegratorContext::new(&mut domain, &model, &mut system);
        assert!(integrator.commit(&mut ctx).is_err());
        assert!(integrator.update(&mut ctx, &DVector::zeros(1)).is_err());
        integrator.new_step(&mut ctx).unwrap();
        assert!(integrator.new_step(&mut ctx).is_err());
    }

    #[test]
    fn test_adaptive_increment() {
        let mut integrator =
            LoadControl::new(LoadControlConfig::adaptive(0.2, 4, 0.05, 0.3)).unwrap();
        integrator.last_iterations = 2;
        integrator.adapt();
        assert_relative_eq!(integrator.increment(), 0.3);

        integrator.last_iterations = 8;
        integrator.adapt();
        assert_relative_eq!(integrator.increment(), 0.15);

        integrator.last_iterations = 100;
        integrator.adapt();
        assert_relative_eq!(integrator.increment(), 0.05);
    }

    #[test]
    fn test_cut_retry_uses_smaller_increment() {
        let mut domain = bar();
        let model = AnalysisModel::build(&mut domain, Numberer::Plain).unwrap();
        let mut system = DenseSystem::default();
        let mut integrator =
            LoadControl::new(LoadControlConfig::adaptive(0.2, 4, 0.05, 0.5)).unwrap();
        integrator.last_iterations = 2;
        let mut ctx = IntegratorContext::new(&mut domain, &model, &mut system);

        integrator.new_step(&mut ctx).unwrap();
        let first = integrator.load_factor();
        integrator.revert(&mut ctx).unwrap();
        integrator.scale_step(0.5);
        integrator.new_step(&mut ctx).unwrap();
        let retry = integrator.load_factor();
        assert_relative_eq!(retry, 0.5 * first, epsilon = 1e-12);
    }

    #[test]
    fn test_commit_adapts_next_increment() {
        let mut domain = bar();
        let model = AnalysisModel::build(&mut domain, Numberer::Plain).unwrap();
        let mut system = DenseSystem::default();
        let mut integrator =
            LoadControl::new(LoadControlConfig::adaptive(0.2, 2, 0.05, 0.5)).unwrap();
        let mut ctx = IntegratorContext::new(&mut domain, &model, &mut system);

        integrator.new_step(&mut ctx).unwrap();
        integrator.update(&mut ctx, &DVector::from_vec(vec![0.0])).unwrap();
        integrator.converged();
        integrator.commit(&mut ctx).unwrap();
        // one iteration against a target of two doubles the increment
        assert_relative_eq!(integrator.increment(), 0.4, epsilon = 1e-12);
        integrator.new_step(&mut ctx).unwrap();
        assert_relative_eq!(integrator.load_factor(), 0.6, epsilon = 1e-12);
    }

    #[test]
    fn test_fixed_increment_ignores_iterations() {
        let mut integrator = LoadControl::new(LoadControlConfig::fixed(-0.1)).unwrap();
        integrator.last_iterations = 7;
        integrator.adapt();
        assert_eq!(integrator.increment(), -0.1);
        integrator.scale_step(0.5);
        assert_eq!(integrator.increment(), -0.05);
        assert!(LoadControl::new(LoadControlConfig::fixed(0.0)).is_err());
    }
}
