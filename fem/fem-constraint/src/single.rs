//! Single-freedom constraints.
//!
//! A [`SingleFreedomConstraint`] fixes or prescribes one DOF of one node.
//! Homogeneous constraints (`value == 0`) are plain supports. A constraint
//! owned by a load pattern can scale its prescribed value with the pattern
//! factor, which makes it a prescribed-displacement load.

use fem_types::{ConstraintTag, FemError, LockerTag, NodeTag, PatternTag};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Registry that owns a single-freedom constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConstraintOwner {
    /// Added directly to the constraint container.
    #[default]
    Standalone,
    /// Owned by a load pattern; removed with it.
    Pattern(PatternTag),
    /// Owned by a node locker; removed with it.
    Locker(LockerTag),
}

/// Fixes or prescribes one DOF of one node.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SingleFreedomConstraint {
    tag: ConstraintTag,
    node: NodeTag,
    dof: usize,
    /// Reference value of the prescribed displacement.
    reference: f64,
    /// Value after the last `apply_constraint`.
    current: f64,
    /// Whether the reference value is multiplied by the owner's load factor.
    scales_with_load: bool,
    owner: ConstraintOwner,
}

impl SingleFreedomConstraint {
    /// Create a homogeneous (fixed) constraint.
    #[must_use]
    pub fn fixed(tag: ConstraintTag, node: NodeTag, dof: usize) -> Self {
        Self::prescribed(tag, node, dof, 0.0)
    }

    /// Create a constraint prescribing a constant value.
    #[must_use]
    pub fn prescribed(tag: ConstraintTag, node: NodeTag, dof: usize, value: f64) -> Self {
        Self {
            tag,
            node,
            dof,
            reference: value,
            current: value,
            scales_with_load: false,
            owner: ConstraintOwner::Standalone,
        }
    }

    /// Scale the prescribed value with the owning pattern's load factor.
    #[must_use]
    pub fn with_load_scaling(mut self, scales: bool) -> Self {
        self.scales_with_load = scales;
        self
    }

    /// Constraint tag.
    #[must_use]
    pub fn tag(&self) -> ConstraintTag {
        self.tag
    }

    /// Constrained node.
    #[must_use]
    pub fn node(&self) -> NodeTag {
        self.node
    }

    /// Constrained DOF (0-based).
    #[must_use]
    pub fn dof(&self) -> usize {
        self.dof
    }

    /// Current prescribed value.
    #[must_use]
    pub fn value(&self) -> f64 {
        self.current
    }

    /// Reference value before load scaling.
    #[must_use]
    pub fn reference_value(&self) -> f64 {
        self.reference
    }

    /// Whether the prescribed value is zero regardless of load factor.
    #[must_use]
    pub fn is_homogeneous(&self) -> bool {
        self.reference == 0.0
    }

    /// Whether the value scales with the owner's load factor.
    #[must_use]
    pub fn scales_with_load(&self) -> bool {
        self.scales_with_load
    }

    /// Registry that owns this constraint.
    #[must_use]
    pub fn owner(&self) -> ConstraintOwner {
        self.owner
    }

    /// Record the owning registry. Called by the constraint container.
    pub fn set_owner(&mut self, owner: ConstraintOwner) {
        self.owner = owner;
    }

    /// Recompute the current value for the given load factor.
    pub fn apply_constraint(&mut self, load_factor: f64) {
        self.current = if self.scales_with_load {
            self.reference * load_factor
        } else {
            self.reference
        };
    }

    /// Check that the DOF exists on a node with `ndf` DOFs.
    pub fn check_dof(&self, ndf: usize) -> fem_types::Result<()> {
        if self.dof >= ndf {
            return Err(FemError::InvalidDof {
                node: self.node,
                dof: self.dof,
                ndf,
            });
        }
        Ok(())
    }
}
