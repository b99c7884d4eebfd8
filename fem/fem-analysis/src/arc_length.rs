//! Arc-length continuation.
//!
//! [`ArcLength`] traces the equilibrium path through limit points by
//! treating the load factor as an unknown. Every step covers the arc length
//! `s` measured in the combined norm
//!
//! ```text
//! ‖(ΔU, Δλ)‖ = sqrt(ΔU·ΔU + ψ²·Δλ²)
//! ```
//!
//! # Predictor
//!
//! `K·uq0 = phat` gives the tangent direction. The increment
//! `Δλ = ±s / sqrt(uq0·uq0 + ψ²)` takes the sign that keeps the predictor
//! pointing the same way as the previous converged increment. A renumbered
//! model drops the step history, so the first step after it goes forward.
//!
//! # Corrector
//!
//! Each iteration gets the residual solution `ur` and the reference
//! solution `uq` (`K·uq = phat`) and applies `du = ur + δλ·uq`, with `δλ`
//! chosen by the configured [`ArcLengthStrategy`]. Degenerate corrections
//! (zero denominator, negative discriminant, non-finite values) fail the
//! step instead of producing non-finite state.

use nalgebra::DVector;
use tracing::debug;

use fem_types::{ArcLengthConfig, ArcLengthStrategy, FemError};

use crate::integrator::{IntegratorContext, IntegratorState, StaticIntegrator, expect_state};

/// Arc-length (equilibrium path) integrator.
#[derive(Debug, Clone)]
pub struct ArcLength {
    config: ArcLengthConfig,
    /// Current step radius; shrinks with step cuts.
    arc_length: f64,
    phat: DVector<f64>,
    uq0: DVector<f64>,
    /// Reference direction of the previous step.
    uq_ref: Option<DVector<f64>>,
    delta_u: DVector<f64>,
    delta_lambda: f64,
    delta_u0: DVector<f64>,
    delta_lambda0: f64,
    /// Last converged increment.
    previous: Option<(DVector<f64>, f64)>,
    sign: f64,
    local: Vec<usize>,
    load_factor: f64,
    iterations: usize,
    state: IntegratorState,
}

impl ArcLength {
    /// Integrator for the given (validated) settings.
    pub fn new(config: ArcLengthConfig) -> fem_types::Result<Self> {
        config.validate()?;
        Ok(Self {
            arc_length: config.arc_length,
            config,
            phat: DVector::zeros(0),
            uq0: DVector::zeros(0),
            uq_ref: None,
            delta_u: DVector::zeros(0),
            delta_lambda: 0.0,
            delta_u0: DVector::zeros(0),
            delta_lambda0: 0.0,
            previous: None,
            sign: 1.0,
            local: Vec::new(),
            load_factor: 0.0,
            iterations: 0,
            state: IntegratorState::Idle,
        })
    }

    /// Settings.
    #[must_use]
    pub fn config(&self) -> &ArcLengthConfig {
        &self.config
    }

    /// Radius the next step will cover.
    #[must_use]
    pub fn arc_length(&self) -> f64 {
        self.arc_length
    }

    /// Reference load vector `phat`.
    #[must_use]
    pub fn reference_load(&self) -> &DVector<f64> {
        &self.phat
    }

    /// Increment `(ΔU, Δλ)` accumulated in the current (or last) step.
    #[must_use]
    pub fn step_increment(&self) -> (&DVector<f64>, f64) {
        (&self.delta_u, self.delta_lambda)
    }

    /// Combined norm `sqrt(ΔU·ΔU + ψ²Δλ²)` of the step increment, measured
    /// over the control DOFs for the local rule.
    #[must_use]
    pub fn step_norm(&self) -> f64 {
        let psi2 = self.psi2();
        (self.dot(&self.delta_u, &self.delta_u) + psi2 * self.delta_lambda * self.delta_lambda).sqrt()
    }

    /// Sign of the last predictor.
    #[must_use]
    pub fn sign(&self) -> f64 {
        self.sign
    }

    fn psi2(&self) -> f64 {
        self.config.load_scale * self.config.load_scale
    }

    /// Dot product in the arc-length metric.
    fn dot(&self, a: &DVector<f64>, b: &DVector<f64>) -> f64 {
        if self.config.strategy == ArcLengthStrategy::Local {
            self.local.iter().map(|&eq| a[eq] * b[eq]).sum()
        } else {
            a.dot(b)
        }
    }

    /// Load-factor correction `δλ` for the residual solution `ur` and the
    /// reference solution `uq`.
    fn correction(&self, ur: &DVector<f64>, uq: &DVector<f64>) -> fem_types::Result<f64> {
        let strategy = self.config.strategy;
        let rule = strategy.name();
        let psi2 = self.psi2();
        let (du, dl) = (&self.delta_u, self.delta_lambda);
        let (du0, dl0) = (&self.delta_u0, self.delta_lambda0);
        let s = self.arc_length;

        match strategy {
            ArcLengthStrategy::MinimumResidualDisplacement => {
                ratio(-uq.dot(ur), uq.dot(uq), rule)
            }
            ArcLengthStrategy::NormalPlane => {
                ratio(-du0.dot(ur), du0.dot(uq) + psi2 * dl0, rule)
            }
            ArcLengthStrategy::UpdatedNormalPlane => {
                ratio(-du.dot(ur), du.dot(uq) + psi2 * dl, rule)
            }
            ArcLengthStrategy::Cylindrical => {
                let a = uq.dot(uq) + psi2;
                let shifted = du + ur;
                let b = 2.0 * (uq.dot(&shifted) + psi2 * dl);
                let c = shifted.dot(&shifted) + psi2 * dl * dl - s * s;
                let roots = quadratic_roots(a, b, c, rule)?;
                // directional dot of each candidate with the current secant
                let directional = |root: f64| {
                    du.dot(&shifted) + root * du.dot(uq) + psi2 * dl * (dl + root)
                };
                Ok(select_root(roots, directional))
            }
            ArcLengthStrategy::ModifiedNormalFlow => ratio(-uq.dot(ur), uq.dot(uq) + psi2, rule),
            ArcLengthStrategy::GeneralizedDisplacementControl => {
                let reference = self.uq_ref.as_ref().unwrap_or(&self.uq0);
                ratio(-reference.dot(ur), reference.dot(uq), rule)
            }
            // linearized |ΔU + δu|² + ψ²(Δλ + δλ)² = s²
            ArcLengthStrategy::ModifiedUpdatedNormalPlane => ratio(
                s * s - du.dot(du) - 2.0 * du.dot(ur) - psi2 * dl * dl,
                2.0 * (du.dot(uq) + psi2 * dl),
                rule,
            ),
            ArcLengthStrategy::SimplifiedNormalPlane => {
                ratio(-du0.dot(ur), du0.dot(&self.uq0) + psi2 * dl0, rule)
            }
            ArcLengthStrategy::Local => {
                ratio(-self.dot(du0, ur), self.dot(du0, uq) + psi2 * dl0, rule)
            }
        }
    }

    fn fail<T>(&mut self, err: FemError) -> fem_types::Result<T> {
        self.state = IntegratorState::Failed;
        Err(err)
    }

    fn predictor(&mut self, ctx: &mut IntegratorContext<'_>) -> fem_types::Result<()> {
        ctx.form_tangent()?;
        let uq0 = ctx.solve_for(&self.phat)?;
        let psi2 = self.psi2();
        let denominator = self.dot(&uq0, &uq0) + psi2;
        let magnitude = ratio(self.arc_length, denominator.sqrt(), "arc-length predictor")?;

        self.sign = match &self.previous {
            Some((du_prev, dl_prev)) if self.dot(&uq0, du_prev) + psi2 * dl_prev < 0.0 => -1.0,
            _ => 1.0,
        };
        let dl = self.sign * magnitude;
        let du = &uq0 * dl;

        self.load_factor = ctx.domain.committed_time() + dl;
        ctx.apply_load(self.load_factor)?;
        ctx.incr_disp(&du)?;

        self.delta_u0.clone_from(&du);
        self.delta_lambda0 = dl;
        self.delta_u = du;
        self.delta_lambda = dl;
        self.uq0 = uq0;
        Ok(())
    }

    fn corrector(
        &mut self,
        ctx: &mut IntegratorContext<'_>,
        ur: &DVector<f64>,
    ) -> fem_types::Result<DVector<f64>> {
        if ur.len() != self.phat.len() {
            return Err(FemError::DimensionMismatch {
                context: "residual solution",
                expected: self.phat.len(),
                actual: ur.len(),
            });
        }
        let uq = if self.config.strategy.resolves_reference() {
            ctx.solve_for(&self.phat)?
        } else {
            self.uq0.clone()
        };
        let d_lambda = self.correction(ur, &uq)?;
        let du = ur + &uq * d_lambda;
        if du.iter().any(|v| !v.is_finite()) {
            return Err(FemError::NonFinite {
                context: "arc-length correction",
            });
        }

        self.delta_u += &du;
        self.delta_lambda += d_lambda;
        self.load_factor += d_lambda;
        ctx.apply_load(self.load_factor)?;
        ctx.incr_disp(&du)?;
        Ok(du)
    }
}

/// `numerator / denominator`, failing on a zero or non-finite denominator.
fn ratio(numerator: f64, denominator: f64, rule: &'static str) -> fem_types::Result<f64> {
    if denominator == 0.0 || !denominator.is_finite() {
        return Err(FemError::ZeroDenominator { rule });
    }
    let value = numerator / denominator;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(FemError::NonFinite { context: rule })
    }
}

/// Real roots of `a·x² + b·x + c`.
fn quadratic_roots(a: f64, b: f64, c: f64, rule: &'static str) -> fem_types::Result<[f64; 2]> {
    if a == 0.0 || !a.is_finite() {
        return Err(FemError::ZeroDenominator { rule });
    }
    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 {
        return Err(FemError::NegativeDiscriminant { discriminant });
    }
    if !discriminant.is_finite() {
        return Err(FemError::NonFinite { context: rule });
    }
    let root = discriminant.sqrt();
    Ok([(-b + root) / (2.0 * a), (-b - root) / (2.0 * a)])
}

/// Pick the root with the larger directional dot product. Exact ties fall
/// back to the smaller `|root|`, then the larger root.
fn select_root(roots: [f64; 2], directional: impl Fn(f64) -> f64) -> f64 {
    let [r1, r2] = roots;
    let (d1, d2) = (directional(r1), directional(r2));
    if d1 > d2 {
        r1
    } else if d2 > d1 {
        r2
    } else if r1.abs() != r2.abs() {
        if r1.abs() < r2.abs() { r1 } else { r2 }
    } else {
        r1.max(r2)
    }
}

impl StaticIntegrator for ArcLength {
    fn name(&self) -> &'static str {
        "arc length"
    }

    fn domain_changed(&mut self, ctx: &mut IntegratorContext<'_>) -> fem_types::Result<()> {
        let n = ctx.model.num_eqn();
        self.phat = ctx.reference_load(ctx.domain.committed_time())?;
        // history vectors are indexed by the old numbering
        self.uq0 = DVector::zeros(n);
        self.delta_u = DVector::zeros(n);
        self.delta_u0 = DVector::zeros(n);
        self.uq_ref = None;
        self.previous = None;
        if let Some(control) = &self.config.local_control {
            self.local = ctx.model.local_equations(ctx.domain, control)?;
        }
        debug!(n, phat_norm = self.phat.norm(), "arc length reference load formed");
        Ok(())
    }

    fn new_step(&mut self, ctx: &mut IntegratorContext<'_>) -> fem_types::Result<()> {
        expect_state(self.name(), self.state, IntegratorState::Idle, "new_step")?;
        if self.phat.len() != ctx.model.num_eqn() {
            return Err(FemError::invalid_state(
                "arc length: reference load not formed for the current numbering",
            ));
        }
        self.iterations = 0;
        self.state = IntegratorState::StepInProgress;
        if let Err(err) = self.predictor(ctx) {
            return self.fail(err);
        }
        debug!(
            load_factor = self.load_factor,
            delta_lambda = self.delta_lambda,
            sign = self.sign,
            strategy = self.config.strategy.name(),
            "arc length predictor"
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
        match self.corrector(ctx, ur) {
            Ok(du) => {
                debug!(
                    iteration = self.iterations,
                    load_factor = self.load_factor,
                    step_norm = self.step_norm(),
                    "arc length correction"
                );
                Ok(du)
            }
            Err(err) => self.fail(err),
        }
    }

    fn converged(&mut self) {
        if self.state == IntegratorState::StepInProgress {
            self.state = IntegratorState::Converged;
        }
    }

    fn commit(&mut self, ctx: &mut IntegratorContext<'_>) -> fem_types::Result<()> {
        expect_state(self.name(), self.state, IntegratorState::Converged, "commit")?;
        ctx.domain.commit();
        self.previous = Some((self.delta_u.clone(), self.delta_lambda));
        self.uq_ref = Some(self.uq0.clone());
        self.state = IntegratorState::Idle;
        Ok(())
    }

    fn revert(&mut self, ctx: &mut IntegratorContext<'_>) -> fem_types::Result<()> {
        ctx.domain.revert_to_last_commit();
        self.load_factor = ctx.domain.committed_time();
        self.delta_u.fill(0.0);
        self.delta_lambda = 0.0;
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
        self.arc_length *= factor;
    }
}
