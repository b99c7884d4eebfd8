//! Domain state container for the structural analysis kernel.
//!
//! The [`Domain`] holds the evolving model and runs the change-tracking
//! protocol the analysis layer relies on:
//!
//! - [`Mesh`]: node and element registries, lazily built adjacency
//!   [`Graph`]s, a spatial index, reaction recovery
//! - [`ConstraintContainer`]: single- and multi-freedom constraints,
//!   [`LoadPattern`]s and [`NodeLocker`]s
//! - [`Element`]: the capability trait element kinds implement, with the
//!   closed set [`ElementKind`] (`Truss`, `CorotTruss`, `ZeroLength`)
//! - persistence through `Domain::send_self` / `Domain::recv_self` (with
//!   the `serde` feature)
//!
//! # Example
//!
//! ```
//! use fem_constraint::SingleFreedomConstraint;
//! use fem_domain::{Domain, LoadPattern, NodalLoad, Node, TimeSeries, Truss};
//! use fem_types::{ConstraintTag, ElementTag, LoadTag, NodeTag, PatternTag};
//!
//! let mut domain = Domain::new();
//! domain.add_node(Node::new(NodeTag::new(1), &[0.0], 1)?)?;
//! domain.add_node(Node::new(NodeTag::new(2), &[1.0], 1)?)?;
//! domain.add_element(Truss::new(
//!     ElementTag::new(1),
//!     [NodeTag::new(1), NodeTag::new(2)],
//!     1.0,
//!     100.0,
//! )?)?;
//! domain.add_sp(SingleFreedomConstraint::fixed(ConstraintTag::new(1), NodeTag::new(1), 0))?;
//!
//! domain.add_load_pattern(LoadPattern::new(PatternTag::new(1), TimeSeries::default()))?;
//! domain.add_nodal_load(
//!     PatternTag::new(1),
//!     NodalLoad::new(LoadTag::new(1), NodeTag::new(2), vec![100.0]),
//! )?;
//! domain.apply_load(1.0)?;
//! assert_eq!(domain.node(NodeTag::new(2)).unwrap().unbalanced_load()[0], 100.0);
//! # Ok::<(), fem_types::FemError>(())
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn)]

mod container;
mod domain;
mod element;
mod graph;
mod load;
mod mesh;
mod node;
#[cfg(feature = "serde")]
mod persist;
mod spatial;
mod truss;
mod zero_length;

pub use container::ConstraintContainer;
pub use domain::{Domain, Removed};
pub use element::{Element, ElementContext, ElementKind, ElementLoadKind};
pub use graph::{Graph, GraphCache, START_VERTEX_NUM, Vertex};
pub use load::{ElementalLoad, LoadPattern, NodalLoad, NodeLocker, TimeSeries};
pub use mesh::Mesh;
pub use node::Node;
pub use spatial::SpatialIndex;
pub use truss::{CorotTruss, Truss};
pub use zero_length::{Spring, ZeroLength};
