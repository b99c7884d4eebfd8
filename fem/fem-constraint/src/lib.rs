//! Constraint model for the structural analysis kernel.
//!
//! Constraints relate dependent degrees of freedom to independent ones:
//!
//! - [`SingleFreedomConstraint`]: one DOF of one node is fixed or prescribed
//! - [`MultiFreedomConstraint`]: `Δu_c = C · Δu_r` between two nodes
//! - [`OneRowMultiFreedomConstraint`]: the single-row special case
//!
//! Multi-freedom kinds share the [`FreedomCoupling`] capability trait and
//! are stored as the closed enum [`MultiFreedom`].
//!
//! # Example
//!
//! ```
//! use fem_constraint::{FreedomCoupling, MultiFreedomConstraint};
//! use fem_types::{ConstraintTag, NodeTag};
//! use nalgebra::DVector;
//!
//! // Node 2 follows node 1 in x and y.
//! let mp = MultiFreedomConstraint::equal_dof(
//!     ConstraintTag::new(1),
//!     NodeTag::new(1),
//!     NodeTag::new(2),
//!     vec![0, 1],
//! )
//! .unwrap();
//!
//! let rm = DVector::from_vec(vec![10.0, -5.0]);
//! let rn = mp.retained_reaction(&rm).unwrap();
//! assert_eq!(rn, DVector::from_vec(vec![-10.0, 5.0]));
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn)]

mod multi;
mod single;

pub use multi::{
    FreedomCoupling, MultiFreedom, MultiFreedomConstraint, OneRowMultiFreedomConstraint,
};
pub use single::{ConstraintOwner, SingleFreedomConstraint};
