//! Error types for model and analysis operations.
//!
//! Every fallible operation in the kernel returns [`crate::Result`]. The
//! variants fall into three families:
//!
//! - **Configuration** errors (duplicate tag, missing node, bad DOF) are
//!   raised before any state is mutated.
//! - **Numerical** errors (singular tangent, zero reference load, negative
//!   discriminant) abort the current step; the last committed state stays
//!   untouched.
//! - **Consistency** errors (version mismatch, dangling reference) are
//!   logged by the caller and the single offending operation is skipped.
//!
//! [`FemError::status_code`] maps each error to the negative integer status
//! a step loop can inspect uniformly.

use thiserror::Error;

use crate::tags::{NodeTag, Registry};

/// Errors that can occur while building or analysing a model.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FemError {
    /// A tag is already present in the target registry.
    #[error("duplicate {registry} tag {tag}")]
    DuplicateTag {
        /// Registry that rejected the tag.
        registry: Registry,
        /// The offending raw tag.
        tag: i32,
    },

    /// A referenced node does not exist.
    #[error("node {0} not found")]
    NodeNotFound(NodeTag),

    /// A referenced entity other than a node does not exist.
    #[error("{registry} {tag} not found")]
    NotFound {
        /// Registry that was searched.
        registry: Registry,
        /// The missing raw tag.
        tag: i32,
    },

    /// A DOF index is outside the range of the node it refers to.
    #[error("dof {dof} out of range for {node} with {ndf} dofs")]
    InvalidDof {
        /// Node the DOF belongs to.
        node: NodeTag,
        /// Requested DOF index (0-based).
        dof: usize,
        /// Number of DOFs at the node.
        ndf: usize,
    },

    /// Invalid configuration or construction argument.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// Dimensions of two operands do not agree.
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Where the mismatch was detected.
        context: &'static str,
        /// Expected size.
        expected: usize,
        /// Actual size.
        actual: usize,
    },

    /// An operation was called in the wrong protocol state.
    #[error("invalid state: {reason}")]
    InvalidState {
        /// Description of the protocol violation.
        reason: String,
    },

    /// The tangent system could not be factorized.
    #[error("singular system: {reason}")]
    SingularSystem {
        /// Description of the degeneracy.
        reason: String,
    },

    /// The reference load vector is identically zero.
    #[error("reference load vector is zero; no active load pattern contributes")]
    ZeroReferenceLoad,

    /// A load-factor update would divide by (nearly) zero.
    #[error("zero denominator in {rule} load-factor update")]
    ZeroDenominator {
        /// Update rule that degenerated.
        rule: &'static str,
    },

    /// The arc-length quadratic has no real root.
    #[error("negative discriminant {discriminant} in arc-length constraint")]
    NegativeDiscriminant {
        /// Value of the discriminant.
        discriminant: f64,
    },

    /// A computed quantity is `NaN` or infinite.
    #[error("non-finite value in {context}")]
    NonFinite {
        /// Where the value was produced.
        context: &'static str,
    },

    /// The iteration budget was exhausted without convergence.
    #[error("no convergence after {iterations} iterations (norm {norm:e})")]
    Unconverged {
        /// Number of iterations performed.
        iterations: usize,
        /// Last value of the convergence norm.
        norm: f64,
    },

    /// Reaction self-check found an unbalanced node.
    #[error("unbalanced reaction at {node}: |R| = {magnitude:e} exceeds {limit:e}")]
    Unbalanced {
        /// Node failing the check.
        node: NodeTag,
        /// Reaction magnitude at the node.
        magnitude: f64,
        /// Allowed magnitude.
        limit: f64,
    },

    /// A constraint references an entity that no longer exists.
    #[error("dangling reference: {reason}")]
    DanglingReference {
        /// Description of the dangling reference.
        reason: String,
    },

    /// Persisted data was written by an incompatible format version.
    #[error("format version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version this build understands.
        expected: i64,
        /// Version found in the data.
        found: i64,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the failure.
        reason: String,
    },

    /// The communication channel has no data for the requested key.
    #[error("channel has no data for db tag {db_tag}, commit {commit_tag}")]
    ChannelEmpty {
        /// Database tag requested.
        db_tag: i32,
        /// Commit tag requested.
        commit_tag: i32,
    },
}

impl FemError {
    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error.
    #[must_use]
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    /// Create a singular system error.
    #[must_use]
    pub fn singular(reason: impl Into<String>) -> Self {
        Self::SingularSystem {
            reason: reason.into(),
        }
    }

    /// Create a dangling reference error.
    #[must_use]
    pub fn dangling(reason: impl Into<String>) -> Self {
        Self::DanglingReference {
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    #[must_use]
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Create a duplicate tag error.
    #[must_use]
    pub fn duplicate(registry: Registry, tag: i32) -> Self {
        Self::DuplicateTag { registry, tag }
    }

    /// Create a not-found error for a non-node registry.
    #[must_use]
    pub fn not_found(registry: Registry, tag: i32) -> Self {
        Self::NotFound { registry, tag }
    }

    /// Check if this is a configuration error (no state was mutated).
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateTag { .. }
                | Self::NodeNotFound(_)
                | Self::NotFound { .. }
                | Self::InvalidDof { .. }
                | Self::InvalidConfig { .. }
                | Self::DimensionMismatch { .. }
        )
    }

    /// Check if this is a numerical failure of a step or iteration.
    #[must_use]
    pub fn is_numerical(&self) -> bool {
        matches!(
            self,
            Self::SingularSystem { .. }
                | Self::ZeroReferenceLoad
                | Self::ZeroDenominator { .. }
                | Self::NegativeDiscriminant { .. }
                | Self::NonFinite { .. }
                | Self::Unconverged { .. }
        )
    }

    /// Negative status code for step-loop inspection.
    ///
    /// Configuration errors map to `-1`, protocol errors to `-2`, numerical
    /// failures to `-3..=-8` and consistency errors to `-9..=-12`.
    #[must_use]
    pub fn status_code(&self) -> i32 {
        match self {
            Self::DuplicateTag { .. }
            | Self::NodeNotFound(_)
            | Self::NotFound { .. }
            | Self::InvalidDof { .. }
            | Self::InvalidConfig { .. }
            | Self::DimensionMismatch { .. } => -1,
            Self::InvalidState { .. } => -2,
            Self::SingularSystem { .. } => -3,
            Self::ZeroReferenceLoad => -4,
            Self::ZeroDenominator { .. } => -5,
            Self::NegativeDiscriminant { .. } => -6,
            Self::NonFinite { .. } => -7,
            Self::Unconverged { .. } => -8,
            Self::Unbalanced { .. } => -9,
            Self::DanglingReference { .. } => -10,
            Self::VersionMismatch { .. } => -11,
            Self::Serialization { .. } | Self::ChannelEmpty { .. } => -12,
        }
    }
}
