//! Static analysis driver.
//!
//! [`StaticAnalysis`] owns the equation numbering, the linear system and an
//! integrator, and runs the incremental-iterative loop:
//!
//! ```text
//! refresh numbering ─► new_step ─► ┌ form unbalance, form tangent, solve ┐
//!                                  └ update, convergence test ───────────┘
//!                       converged ─► commit        failed ─► revert, cut
//! ```
//!
//! A failed trial state is never committed. With `max_step_cuts > 0` a
//! failed step is retried with the integrator's step scaled by
//! `step_cut_factor`.

use tracing::{debug, info, warn};

use fem_domain::Domain;
use fem_types::{AnalysisConfig, FemError};

use crate::convergence::ConvergenceTest;
use crate::integrator::{IntegratorContext, StaticIntegrator};
use crate::linear_system::{DenseSystem, LinearSystem};
use crate::model::AnalysisModel;

/// Outcome of one converged step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Committed load factor.
    pub load_factor: f64,
    /// Newton iterations of the converged attempt.
    pub iterations: usize,
    /// Final convergence norm.
    pub norm: f64,
    /// Step cuts needed before the step converged.
    pub cuts: usize,
}

/// Incremental-iterative static analysis.
pub struct StaticAnalysis<I, S = DenseSystem> {
    config: AnalysisConfig,
    model: Option<AnalysisModel>,
    integrator: I,
    system: S,
    test: ConvergenceTest,
}

impl<I: StaticIntegrator> StaticAnalysis<I, DenseSystem> {
    /// Analysis with a dense linear system.
    pub fn new(config: AnalysisConfig, integrator: I) -> fem_types::Result<Self> {
        Self::with_system(config, integrator, DenseSystem::default())
    }
}

impl<I: StaticIntegrator, S: LinearSystem> StaticAnalysis<I, S> {
    /// Analysis with a caller-provided linear system.
    pub fn with_system(config: AnalysisConfig, integrator: I, system: S) -> fem_types::Result<Self> {
        config.validate()?;
        let test = ConvergenceTest::new(config.convergence.clone());
        Ok(Self {
            config,
            model: None,
            integrator,
            system,
            test,
        })
    }

    /// Settings.
    #[must_use]
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// The integrator.
    #[must_use]
    pub fn integrator(&self) -> &I {
        &self.integrator
    }

    /// The integrator, mutably (for example to change its step).
    pub fn integrator_mut(&mut self) -> &mut I {
        &mut self.integrator
    }

    /// Current equation numbering, once the first step numbered the domain.
    #[must_use]
    pub fn model(&self) -> Option<&AnalysisModel> {
        self.model.as_ref()
    }

    /// The linear system.
    #[must_use]
    pub fn system(&self) -> &S {
        &self.system
    }

    /// Renumber and notify the integrator if the domain changed.
    fn refresh(&mut self, domain: &mut Domain) -> fem_types::Result<()> {
        let changed = match &mut self.model {
            Some(model) => model.refresh(domain)?,
            None => {
                self.model = Some(AnalysisModel::build(domain, self.config.numberer)?);
                true
            }
        };
        if changed {
            let Some(model) = self.model.as_ref() else {
                return Err(FemError::invalid_state("equation numbering missing"));
            };
            self.system.resize(model.num_eqn());
            let mut ctx = IntegratorContext::new(domain, model, &mut self.system);
            if let Err(err) = self.integrator.domain_changed(&mut ctx) {
                // renumber on the next attempt
                self.model = None;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Run one step, cutting it on numerical failure.
    pub fn step(&mut self, domain: &mut Domain) -> fem_types::Result<StepReport> {
        self.refresh(domain)?;
        let mut cuts = 0;
        loop {
            match self.attempt(domain) {
                Ok((iterations, norm)) => {
                    let report = StepReport {
                        load_factor: domain.committed_time(),
                        iterations,
                        norm,
                        cuts,
                    };
                    info!(
                        integrator = self.integrator.name(),
                        load_factor = report.load_factor,
                        iterations,
                        norm,
                        cuts,
                        "step converged"
                    );
                    return Ok(report);
                }
                Err(err) => {
                    self.revert(domain)?;
                    if !err.is_numerical() || cuts >= self.config.max_step_cuts {
                        warn!(status = err.status_code(), %err, "step failed");
                        return Err(err);
                    }
                    cuts += 1;
                    self.integrator.scale_step(self.config.step_cut_factor);
                    debug!(cuts, %err, "step cut");
                }
            }
        }
    }

    /// Run `steps` steps, stopping at the first failure.
    pub fn analyze(&mut self, domain: &mut Domain, steps: usize) -> fem_types::Result<Vec<StepReport>> {
        let mut reports = Vec::with_capacity(steps);
        for _ in 0..steps {
            reports.push(self.step(domain)?);
        }
        Ok(reports)
    }

    fn revert(&mut self, domain: &mut Domain) -> fem_types::Result<()> {
        let Some(model) = self.model.as_ref() else {
            domain.revert_to_last_commit();
            return Ok(());
        };
        let mut ctx = IntegratorContext::new(domain, model, &mut self.system);
        self.integrator.revert(&mut ctx)
    }

    /// One attempt: predictor, Newton iterations, commit.
    fn attempt(&mut self, domain: &mut Domain) -> fem_types::Result<(usize, f64)> {
        let Some(model) = self.model.as_ref() else {
            return Err(FemError::invalid_state("step attempted before numbering"));
        };
        let mut ctx = IntegratorContext::new(domain, model, &mut self.system);
        self.test.start();
        self.integrator.new_step(&mut ctx)?;

        let max_iterations = self.test.config().max_iterations;
        let mut iterations = 0;
        loop {
            model.form_unbalance(ctx.domain, ctx.system)?;
            let r = ctx.system.b().clone();
            if self.test.check_unbalance(&r)? {
                break;
            }
            if iterations == max_iterations {
                return Err(self.test.unconverged(iterations));
            }
            ctx.form_tangent()?;
            ctx.system.solve()?;
            let ur = ctx.system.x().clone();
            let du = self.integrator.update(&mut ctx, &ur)?;
            iterations += 1;
            if self.test.check_increment(&du, &r)? {
                break;
            }
        }

        self.integrator.converged();
        self.integrator.commit(&mut ctx)?;
        Ok((iterations, self.test.last_norm()))
    }
}
