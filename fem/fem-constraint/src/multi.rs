//! Multi-freedom constraints.
//!
//! A multi-freedom constraint relates a set of constrained DOFs on one node
//! to a set of retained DOFs on another node through a constraint matrix:
//!
//! ```text
//! Δu_constrained = C · Δu_retained
//! ```
//!
//! Two storage kinds are provided behind the [`FreedomCoupling`] capability
//! trait:
//!
//! - [`MultiFreedomConstraint`]: dense `C` of shape `(|constrained|, |retained|)`
//! - [`OneRowMultiFreedomConstraint`]: a single constrained DOF, `C` stored
//!   as one row
//!
//! The closed enum [`MultiFreedom`] is what registries store.
//!
//! # Reaction recovery
//!
//! After DOF elimination the constraint force shows up as a reaction `Rm` on
//! the constrained node. Its work-equivalent on the retained node is
//!
//! ```text
//! Rn = -Cᵀ · Rm
//! ```
//!
//! which [`FreedomCoupling::retained_reaction`] computes.

use nalgebra::{DMatrix, DVector};

use fem_types::{ConstraintTag, FemError, NodeTag};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Capability interface shared by every multi-freedom constraint kind.
pub trait FreedomCoupling {
    /// Constraint tag.
    fn tag(&self) -> ConstraintTag;

    /// Node owning the constrained (dependent) DOFs.
    fn constrained_node(&self) -> NodeTag;

    /// Node owning the retained (independent) DOFs.
    fn retained_node(&self) -> NodeTag;

    /// Constrained DOF indices, unique.
    fn constrained_dofs(&self) -> &[usize];

    /// Retained DOF indices, unique.
    fn retained_dofs(&self) -> &[usize];

    /// Entry `C[row, col]`, or `None` outside the matrix.
    fn coefficient(&self, row: usize, col: usize) -> Option<f64>;

    /// Dense copy of the constraint matrix.
    fn constraint_matrix(&self) -> DMatrix<f64> {
        let rows = self.constrained_dofs().len();
        let cols = self.retained_dofs().len();
        DMatrix::from_fn(rows, cols, |i, j| self.coefficient(i, j).unwrap_or(0.0))
    }

    /// Recompute the constraint matrix for a new pseudo-time.
    ///
    /// Constraints are time invariant unless a kind overrides this.
    fn apply_constraint(&mut self, _pseudo_time: f64) {}

    /// Whether `(node, dof)` appears in the constrained or retained set.
    fn affects_node_and_dof(&self, node: NodeTag, dof: usize) -> bool {
        (node == self.constrained_node() && self.constrained_dofs().contains(&dof))
            || (node == self.retained_node() && self.retained_dofs().contains(&dof))
    }

    /// Work-equivalent retained reaction `-Cᵀ · rm`.
    ///
    /// `rm` is the constrained node's reaction restricted to the constrained
    /// DOFs, in the order of [`Self::constrained_dofs`].
    fn retained_reaction(&self, rm: &DVector<f64>) -> fem_types::Result<DVector<f64>> {
        let rows = self.constrained_dofs().len();
        if rm.len() != rows {
            return Err(FemError::DimensionMismatch {
                context: "constrained reaction",
                expected: rows,
                actual: rm.len(),
            });
        }
        let cols = self.retained_dofs().len();
        let mut rn = DVector::zeros(cols);
        for j in 0..cols {
            let mut sum = 0.0;
            for i in 0..rows {
                sum += self.coefficient(i, j).unwrap_or(0.0) * rm[i];
            }
            rn[j] = -sum;
        }
        Ok(rn)
    }
}

fn check_unique(dofs: &[usize], what: &str) -> fem_types::Result<()> {
    for (i, dof) in dofs.iter().enumerate() {
        if dofs[..i].contains(dof) {
            return Err(FemError::invalid_config(format!(
                "{what} dof {dof} listed twice"
            )));
        }
    }
    Ok(())
}

fn check_nodes(
    constrained: NodeTag,
    retained: NodeTag,
    constrained_dofs: &[usize],
    retained_dofs: &[usize],
) -> fem_types::Result<()> {
    if constrained_dofs.is_empty() || retained_dofs.is_empty() {
        return Err(FemError::invalid_config(
            "multi-freedom constraint needs constrained and retained dofs",
        ));
    }
    check_unique(constrained_dofs, "constrained")?;
    check_unique(retained_dofs, "retained")?;
    if constrained == retained && constrained_dofs.iter().any(|d| retained_dofs.contains(d)) {
        return Err(FemError::invalid_config(format!(
            "{constrained} cannot retain a dof it constrains"
        )));
    }
    Ok(())
}

/// Multi-freedom constraint with a dense constraint matrix.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MultiFreedomConstraint {
    tag: ConstraintTag,
    constrained_node: NodeTag,
    retained_node: NodeTag,
    constrained_dofs: Vec<usize>,
    retained_dofs: Vec<usize>,
    matrix: DMatrix<f64>,
}

impl MultiFreedomConstraint {
    /// Create a constraint `Δu_c = C · Δu_r`.
    ///
    /// # Errors
    ///
    /// Fails if the DOF sets are empty or contain duplicates, or if `matrix`
    /// is not `(constrained_dofs.len(), retained_dofs.len())`.
    pub fn new(
        tag: ConstraintTag,
        retained_node: NodeTag,
        constrained_node: NodeTag,
        matrix: DMatrix<f64>,
        constrained_dofs: Vec<usize>,
        retained_dofs: Vec<usize>,
    ) -> fem_types::Result<Self> {
        check_nodes(
            constrained_node,
            retained_node,
            &constrained_dofs,
            &retained_dofs,
        )?;
        if matrix.nrows() != constrained_dofs.len() {
            return Err(FemError::DimensionMismatch {
                context: "constraint matrix rows",
                expected: constrained_dofs.len(),
                actual: matrix.nrows(),
            });
        }
        if matrix.ncols() != retained_dofs.len() {
            return Err(FemError::DimensionMismatch {
                context: "constraint matrix columns",
                expected: retained_dofs.len(),
                actual: matrix.ncols(),
            });
        }
        if matrix.iter().any(|c| !c.is_finite()) {
            return Err(FemError::NonFinite {
                context: "constraint matrix",
            });
        }
        Ok(Self {
            tag,
            constrained_node,
            retained_node,
            constrained_dofs,
            retained_dofs,
            matrix,
        })
    }

    /// Tie `dofs` of the constrained node to the same DOFs of the retained
    /// node (identity matrix).
    pub fn equal_dof(
        tag: ConstraintTag,
        retained_node: NodeTag,
        constrained_node: NodeTag,
        dofs: Vec<usize>,
    ) -> fem_types::Result<Self> {
        let n = dofs.len();
        Self::new(
            tag,
            retained_node,
            constrained_node,
            DMatrix::identity(n, n),
            dofs.clone(),
            dofs,
        )
    }

    /// Borrow the constraint matrix.
    #[must_use]
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }
}

impl FreedomCoupling for MultiFreedomConstraint {
    fn tag(&self) -> ConstraintTag {
        self.tag
    }

    fn constrained_node(&self) -> NodeTag {
        self.constrained_node
    }

    fn retained_node(&self) -> NodeTag {
        self.retained_node
    }

    fn constrained_dofs(&self) -> &[usize] {
        &self.constrained_dofs
    }

    fn retained_dofs(&self) -> &[usize] {
        &self.retained_dofs
    }

    fn coefficient(&self, row: usize, col: usize) -> Option<f64> {
        self.matrix.get((row, col)).copied()
    }

    fn constraint_matrix(&self) -> DMatrix<f64> {
        self.matrix.clone()
    }

    fn retained_reaction(&self, rm: &DVector<f64>) -> fem_types::Result<DVector<f64>> {
        if rm.len() != self.matrix.nrows() {
            return Err(FemError::DimensionMismatch {
                context: "constrained reaction",
                expected: self.matrix.nrows(),
                actual: rm.len(),
            });
        }
        Ok(-self.matrix.tr_mul(rm))
    }
}

/// Multi-freedom constraint with a single constrained DOF.
///
/// Stores `C` as one row instead of a matrix.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OneRowMultiFreedomConstraint {
    tag: ConstraintTag,
    constrained_node: NodeTag,
    retained_node: NodeTag,
    constrained_dof: [usize; 1],
    retained_dofs: Vec<usize>,
    row: Vec<f64>,
}

impl OneRowMultiFreedomConstraint {
    /// Create `Δu_c[dof] = Σ row[j] · Δu_r[retained_dofs[j]]`.
    pub fn new(
        tag: ConstraintTag,
        retained_node: NodeTag,
        constrained_node: NodeTag,
        constrained_dof: usize,
        retained_dofs: Vec<usize>,
        row: Vec<f64>,
    ) -> fem_types::Result<Self> {
        check_nodes(
            constrained_node,
            retained_node,
            &[constrained_dof],
            &retained_dofs,
        )?;
        if row.len() != retained_dofs.len() {
            return Err(FemError::DimensionMismatch {
                context: "constraint row",
                expected: retained_dofs.len(),
                actual: row.len(),
            });
        }
        if row.iter().any(|c| !c.is_finite()) {
            return Err(FemError::NonFinite {
                context: "constraint row",
            });
        }
        Ok(Self {
            tag,
            constrained_node,
            retained_node,
            constrained_dof: [constrained_dof],
            retained_dofs,
            row,
        })
    }

    /// Coefficients of the single constraint row.
    #[must_use]
    pub fn row(&self) -> &[f64] {
        &self.row
    }
}

impl FreedomCoupling for OneRowMultiFreedomConstraint {
    fn tag(&self) -> ConstraintTag {
        self.tag
    }

    fn constrained_node(&self) -> NodeTag {
        self.constrained_node
    }

    fn retained_node(&self) -> NodeTag {
        self.retained_node
    }

    fn constrained_dofs(&self) -> &[usize] {
        &self.constrained_dof
    }

    fn retained_dofs(&self) -> &[usize] {
        &self.retained_dofs
    }

    fn coefficient(&self, row: usize, col: usize) -> Option<f64> {
        if row == 0 {
            self.row.get(col).copied()
        } else {
            None
        }
    }

    fn retained_reaction(&self, rm: &DVector<f64>) -> fem_types::Result<DVector<f64>> {
        if rm.len() != 1 {
            return Err(FemError::DimensionMismatch {
                context: "constrained reaction",
                expected: 1,
                actual: rm.len(),
            });
        }
        Ok(DVector::from_iterator(
            self.row.len(),
            self.row.iter().map(|c| -c * rm[0]),
        ))
    }
}

/// Closed set of multi-freedom constraint kinds.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MultiFreedom {
    /// Dense constraint matrix.
    Matrix(MultiFreedomConstraint),
    /// Single constraint row.
    OneRow(OneRowMultiFreedomConstraint),
}

impl From<MultiFreedomConstraint> for MultiFreedom {
    fn from(mp: MultiFreedomConstraint) -> Self {
        Self::Matrix(mp)
    }
}

impl From<OneRowMultiFreedomConstraint> for MultiFreedom {
    fn from(mp: OneRowMultiFreedomConstraint) -> Self {
        Self::OneRow(mp)
    }
}

impl MultiFreedom {
    fn inner(&self) -> &dyn FreedomCoupling {
        match self {
            Self::Matrix(mp) => mp,
            Self::OneRow(mp) => mp,
        }
    }
}

impl FreedomCoupling for MultiFreedom {
    fn tag(&self) -> ConstraintTag {
        self.inner().tag()
    }

    fn constrained_node(&self) -> NodeTag {
        self.inner().constrained_node()
    }

    fn retained_node(&self) -> NodeTag {
        self.inner().retained_node()
    }

    fn constrained_dofs(&self) -> &[usize] {
        match self {
            Self::Matrix(mp) => mp.constrained_dofs(),
            Self::OneRow(mp) => mp.constrained_dofs(),
        }
    }

    fn retained_dofs(&self) -> &[usize] {
        match self {
            Self::Matrix(mp) => mp.retained_dofs(),
            Self::OneRow(mp) => mp.retained_dofs(),
        }
    }

    fn coefficient(&self, row: usize, col: usize) -> Option<f64> {
        self.inner().coefficient(row, col)
    }

    fn constraint_matrix(&self) -> DMatrix<f64> {
        self.inner().constraint_matrix()
    }

    fn apply_constraint(&mut self, pseudo_time: f64) {
        match self {
            Self::Matrix(mp) => mp.apply_constraint(pseudo_time),
            Self::OneRow(mp) => mp.apply_constraint(pseudo_time),
        }
    }

    fn retained_reaction(&self, rm: &DVector<f64>) -> fem_types::Result<DVector<f64>> {
        self.inner().retained_reaction(rm)
    }
}

// ============================================================================
// Persistence
// ============================================================================

#[cfg(feature = "serde")]
const KIND_MATRIX: i64 = 0;
#[cfg(feature = "serde")]
const KIND_ONE_ROW: i64 = 1;

#[cfg(feature = "serde")]
fn to_tag(value: i64) -> fem_types::Result<i32> {
    i32::try_from(value).map_err(|_| FemError::serialization(format!("tag {value} out of range")))
}

#[cfg(feature = "serde")]
fn to_index(value: i64) -> fem_types::Result<usize> {
    usize::try_from(value)
        .map_err(|_| FemError::serialization(format!("index {value} out of range")))
}

#[cfg(feature = "serde")]
impl MultiFreedom {
    /// Write the constraint to `channel`.
    ///
    /// Three payloads are sent: the metadata slots
    /// `[version, tag, constrained node, retained node, n_c, n_r, kind]`,
    /// the constrained then retained DOF indices, and `C` in row-major order.
    pub fn send_self(
        &self,
        db_tag: i32,
        commit_tag: i32,
        channel: &mut dyn fem_types::channel::Channel,
    ) -> fem_types::Result<()> {
        use fem_types::channel::{FORMAT_VERSION, Payload};

        let kind = match self {
            Self::Matrix(_) => KIND_MATRIX,
            Self::OneRow(_) => KIND_ONE_ROW,
        };
        let n_c = self.constrained_dofs().len();
        let n_r = self.retained_dofs().len();
        let meta = vec![
            FORMAT_VERSION,
            i64::from(self.tag().raw()),
            i64::from(self.constrained_node().raw()),
            i64::from(self.retained_node().raw()),
            n_c as i64,
            n_r as i64,
            kind,
        ];
        channel.send(db_tag, commit_tag, &Payload::Id(meta))?;

        let dofs = self
            .constrained_dofs()
            .iter()
            .chain(self.retained_dofs())
            .map(|&d| d as i64)
            .collect();
        channel.send(db_tag, commit_tag, &Payload::Id(dofs))?;

        let mut data = Vec::with_capacity(n_c * n_r);
        for i in 0..n_c {
            for j in 0..n_r {
                data.push(self.coefficient(i, j).unwrap_or(0.0));
            }
        }
        channel.send(db_tag, commit_tag, &Payload::Vector(data))
    }

    /// Rebuild a constraint written by [`Self::send_self`].
    pub fn recv_self(
        db_tag: i32,
        commit_tag: i32,
        channel: &mut dyn fem_types::channel::Channel,
    ) -> fem_types::Result<Self> {
        use fem_types::channel::{check_version, slot};

        let meta = channel.recv(db_tag, commit_tag)?.into_id()?;
        check_version(&meta)?;
        let tag = ConstraintTag(to_tag(slot(&meta, 1)?)?);
        let constrained_node = NodeTag(to_tag(slot(&meta, 2)?)?);
        let retained_node = NodeTag(to_tag(slot(&meta, 3)?)?);
        let n_c = to_index(slot(&meta, 4)?)?;
        let n_r = to_index(slot(&meta, 5)?)?;
        let kind = slot(&meta, 6)?;

        let dofs = channel
            .recv(db_tag, commit_tag)?
            .into_id()?
            .into_iter()
            .map(to_index)
            .collect::<fem_types::Result<Vec<_>>>()?;
        if dofs.len() != n_c + n_r {
            return Err(FemError::serialization(format!(
                "expected {} dof indices, got {}",
                n_c + n_r,
                dofs.len()
            )));
        }
        let data = channel.recv(db_tag, commit_tag)?.into_vector()?;
        if data.len() != n_c * n_r {
            return Err(FemError::serialization(format!(
                "expected {} matrix entries, got {}",
                n_c * n_r,
                data.len()
            )));
        }

        let constrained_dofs = dofs[..n_c].to_vec();
        let retained_dofs = dofs[n_c..].to_vec();
        match kind {
            KIND_MATRIX => MultiFreedomConstraint::new(
                tag,
                retained_node,
                constrained_node,
                DMatrix::from_row_slice(n_c, n_r, &data),
                constrained_dofs,
                retained_dofs,
            )
            .map(Self::Matrix),
            KIND_ONE_ROW if n_c == 1 => OneRowMultiFreedomConstraint::new(
                tag,
                retained_node,
                constrained_node,
                constrained_dofs[0],
                retained_dofs,
                data,
            )
            .map(Self::OneRow),
            other => Err(FemError::serialization(format!(
                "unknown multi-freedom kind {other} with {n_c} rows"
            ))),
        }
    }
}

#[cfg(feature = "serde")]
impl MultiFreedomConstraint {
    /// Write the constraint to `channel`. See [`MultiFreedom::send_self`].
    pub fn send_self(
        &self,
        db_tag: i32,
        commit_tag: i32,
        channel: &mut dyn fem_types::channel::Channel,
    ) -> fem_types::Result<()> {
        MultiFreedom::Matrix(self.clone()).send_self(db_tag, commit_tag, channel)
    }

    /// Rebuild a constraint written by [`Self::send_self`].
    pub fn recv_self(
        db_tag: i32,
        commit_tag: i32,
        channel: &mut dyn fem_types::channel::Channel,
    ) -> fem_types::Result<Self> {
        match MultiFreedom::recv_self(db_tag, commit_tag, channel)? {
            MultiFreedom::Matrix(mp) => Ok(mp),
            MultiFreedom::OneRow(_) => Err(FemError::serialization(
                "expected a matrix constraint, got a one-row constraint",
            )),
        }
    }
}
