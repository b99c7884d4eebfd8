//! Linear system of equations `A·x = b` assembled by the analysis model.
//!
//! The integrators only talk to the [`LinearSystem`] trait. [`DenseSystem`]
//! stores `A` densely and keeps its factorization until `A` is touched
//! again, so repeated solves against the same tangent (the arc-length
//! reference solve, modified Newton) reuse one factorization.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn, LU};
use tracing::trace;

use fem_types::FemError;

/// Pivot magnitude, relative to the largest pivot, below which the matrix
/// is treated as singular.
const PIVOT_TOLERANCE: f64 = 1e-12;

/// Assembly and solve interface used by the integrators.
pub trait LinearSystem {
    /// Resize to `n` equations and zero `A`, `b` and `x`.
    fn resize(&mut self, n: usize);

    /// Number of equations.
    fn size(&self) -> usize;

    /// Zero the coefficient matrix.
    fn zero_a(&mut self);

    /// Zero the right-hand side.
    fn zero_b(&mut self);

    /// Accumulate `value` into `A[i, j]`.
    fn add_a(&mut self, i: usize, j: usize, value: f64);

    /// Accumulate `value` into `b[i]`.
    fn add_b(&mut self, i: usize, value: f64);

    /// Overwrite the right-hand side.
    fn set_b(&mut self, b: &DVector<f64>) -> fem_types::Result<()>;

    /// Current right-hand side.
    fn b(&self) -> &DVector<f64>;

    /// Solve `A·x = b`, factoring `A` if it changed since the last solve.
    fn solve(&mut self) -> fem_types::Result<()>;

    /// Solution of the last [`Self::solve`].
    fn x(&self) -> &DVector<f64>;
}

#[derive(Debug, Clone)]
enum Factor {
    Cholesky(Cholesky<f64, Dyn>),
    Lu(LU<f64, Dyn, Dyn>),
}

impl Factor {
    fn solve(&self, b: &DVector<f64>) -> Option<DVector<f64>> {
        match self {
            Self::Cholesky(chol) => Some(chol.solve(b)),
            Self::Lu(lu) => lu.solve(b),
        }
    }
}

/// Dense storage with a cached factorization.
///
/// Factors with Cholesky when `A` is symmetric positive definite and falls
/// back to LU otherwise (softening tangents past a limit point are
/// indefinite).
#[derive(Debug, Clone)]
pub struct DenseSystem {
    a: DMatrix<f64>,
    b: DVector<f64>,
    x: DVector<f64>,
    factor: Option<Factor>,
}

impl Default for DenseSystem {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DenseSystem {
    /// A zeroed system of `n` equations.
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            a: DMatrix::zeros(n, n),
            b: DVector::zeros(n),
            x: DVector::zeros(n),
            factor: None,
        }
    }

    /// Coefficient matrix.
    #[must_use]
    pub fn a(&self) -> &DMatrix<f64> {
        &self.a
    }

    /// Whether a factorization of the current `A` is cached.
    #[must_use]
    pub fn is_factored(&self) -> bool {
        self.factor.is_some()
    }

    fn factor(&self) -> fem_types::Result<Factor> {
        let n = self.a.nrows();
        if let Some(chol) = self.a.clone().cholesky() {
            let diag = chol.l_dirty().diagonal();
            if pivots_ok(diag.iter().map(|d| d * d)) {
                return Ok(Factor::Cholesky(chol));
            }
        }
        let lu = self.a.clone().lu();
        let u = lu.u();
        if !pivots_ok(u.diagonal().iter().copied()) {
            return Err(FemError::singular(format!(
                "{n}x{n} tangent has a zero pivot"
            )));
        }
        trace!(n, "tangent factored with LU");
        Ok(Factor::Lu(lu))
    }
}

fn pivots_ok(pivots: impl Iterator<Item = f64>) -> bool {
    let pivots: Vec<f64> = pivots.map(f64::abs).collect();
    let largest = pivots.iter().copied().fold(0.0_f64, f64::max);
    if !largest.is_finite() || largest == 0.0 {
        return pivots.is_empty();
    }
    pivots.iter().all(|p| *p > PIVOT_TOLERANCE * largest)
}

impl LinearSystem for DenseSystem {
    fn resize(&mut self, n: usize) {
        *self = Self::new(n);
    }

    fn size(&self) -> usize {
        self.b.len()
    }

    fn zero_a(&mut self) {
        self.a.fill(0.0);
        self.factor = None;
    }

    fn zero_b(&mut self) {
        self.b.fill(0.0);
    }

    fn add_a(&mut self, i: usize, j: usize, value: f64) {
        self.a[(i, j)] += value;
        self.factor = None;
    }

    fn add_b(&mut self, i: usize, value: f64) {
        self.b[i] += value;
    }

    fn set_b(&mut self, b: &DVector<f64>) -> fem_types::Result<()> {
        if b.len() != self.b.len() {
            return Err(FemError::DimensionMismatch {
                context: "right-hand side",
                expected: self.b.len(),
                actual: b.len(),
            });
        }
        self.b.copy_from(b);
        Ok(())
    }

    fn b(&self) -> &DVector<f64> {
        &self.b
    }

    fn solve(&mut self) -> fem_types::Result<()> {
        if self.b.is_empty() {
            return Ok(());
        }
        if self.factor.is_none() {
            self.factor = Some(self.factor()?);
        }
        let x = self
            .factor
            .as_ref()
            .and_then(|f| f.solve(&self.b))
            .ok_or_else(|| FemError::singular("factorization failed to solve"))?;
        if x.iter().any(|v| !v.is_finite()) {
            return Err(FemError::NonFinite {
                context: "linear solve",
            });
        }
        self.x = x;
        Ok(())
    }

    fn x(&self) -> &DVector<f64> {
        &self.x
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assemble(system: &mut DenseSystem, a: &[[f64; 2]; 2], b: [f64; 2]) {
        system.resize(2);
        for (i, row) in a.iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                system.add_a(i, j, *v);
            }
            system.add_b(i, b[i]);
        }
    }

    #[test]
    fn test_solve_spd() {
        let mut system = DenseSystem::default();
        assemble(&mut system, &[[4.0, 1.0], [1.0, 3.0]], [1.0, 2.0]);
        system.solve().unwrap();
        assert_relative_eq!(system.x()[0], 1.0 / 11.0, epsilon = 1e-12);
        assert_relative_eq!(system.x()[1], 7.0 / 11.0, epsilon = 1e-12);
        assert!(system.is_factored());
    }

    #[test]
    fn test_indefinite_falls_back_to_lu() {
        let mut system = DenseSystem::default();
        assemble(&mut system, &[[-2.0, 0.0], [0.0, 1.0]], [4.0, 1.0]);
        system.solve().unwrap();
        assert_relative_eq!(system.x()[0], -2.0, epsilon = 1e-12);
        assert_relative_eq!(system.x()[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_singular_reported() {
        let mut system = DenseSystem::default();
        assemble(&mut system, &[[1.0, 1.0], [1.0, 1.0]], [1.0, 0.0]);
        let err = system.solve().unwrap_err();
        assert!(matches!(err, FemError::SingularSystem { .. }));
        assert!(err.is_numerical());
    }

    #[test]
    fn test_factor_reused_until_a_changes() {
        let mut system = DenseSystem::default();
        assemble(&mut system, &[[2.0, 0.0], [0.0, 2.0]], [2.0, 4.0]);
        system.solve().unwrap();
        system.set_b(&DVector::from_vec(vec![4.0, 8.0])).unwrap();
        assert!(system.is_factored());
        system.solve().unwrap();
        assert_relative_eq!(system.x()[1], 4.0, epsilon = 1e-12);

        system.add_a(0, 0, 2.0);
        assert!(!system.is_factored());
        system.solve().unwrap();
        assert_relative_eq!(system.x()[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rhs_length_checked() {
        let mut system = DenseSystem::new(3);
        let err = system.set_b(&DVector::zeros(2)).unwrap_err();
        assert!(matches!(err, FemError::DimensionMismatch { .. }));
        // empty system solves trivially
        let mut empty = DenseSystem::default();
        empty.solve().unwrap();
        assert_eq!(empty.size(), 0);
    }
}
