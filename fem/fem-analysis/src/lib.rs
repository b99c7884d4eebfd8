//! Equilibrium-path controllers for the structural analysis kernel.
//!
//! This crate drives a [`fem_domain::Domain`] along its static equilibrium
//! path:
//!
//! - [`AnalysisModel`]: equation numbering (plain or reverse Cuthill-McKee),
//!   elimination of constrained DOFs, assembly of tangent and unbalance
//! - [`LinearSystem`]: the solver seam, with the dense [`DenseSystem`]
//! - [`StaticIntegrator`]: the controller contract, implemented by
//!   [`LoadControl`] (fixed or adaptive load stepping) and [`ArcLength`]
//!   (continuation with nine load-factor correction rules)
//! - [`ConvergenceTest`]: displacement, unbalance and energy norms
//! - [`StaticAnalysis`]: the step loop, with commit, revert and step cutting
//!
//! # Example
//!
//! ```
//! use fem_analysis::{LoadControl, StaticAnalysis};
//! use fem_constraint::SingleFreedomConstraint;
//! use fem_domain::{Domain, LoadPattern, NodalLoad, Node, TimeSeries, Truss};
//! use fem_types::{
//!     AnalysisConfig, ConstraintTag, ElementTag, LoadControlConfig, LoadTag, NodeTag, PatternTag,
//! };
//!
//! let mut domain = Domain::new();
//! domain.add_node(Node::new(NodeTag::new(1), &[0.0], 1)?)?;
//! domain.add_node(Node::new(NodeTag::new(2), &[2.0], 1)?)?;
//! domain.add_element(Truss::new(
//!     ElementTag::new(1),
//!     [NodeTag::new(1), NodeTag::new(2)],
//!     1.0,
//!     100.0,
//! )?)?;
//! domain.add_sp(SingleFreedomConstraint::fixed(ConstraintTag::new(1), NodeTag::new(1), 0))?;
//! domain.add_load_pattern(LoadPattern::new(PatternTag::new(1), TimeSeries::default()))?;
//! domain.add_nodal_load(
//!     PatternTag::new(1),
//!     NodalLoad::new(LoadTag::new(1), NodeTag::new(2), vec![10.0]),
//! )?;
//!
//! let integrator = LoadControl::new(LoadControlConfig::fixed(1.0))?;
//! let mut analysis = StaticAnalysis::new(AnalysisConfig::default(), integrator)?;
//! let report = analysis.step(&mut domain)?;
//!
//! assert_eq!(report.load_factor, 1.0);
//! let u = domain.node(NodeTag::new(2)).unwrap().committed_disp()[0];
//! assert!((u - 0.2).abs() < 1e-12);
//! # Ok::<(), fem_types::FemError>(())
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn)]

mod arc_length;
mod convergence;
mod driver;
mod integrator;
mod linear_system;
mod load_control;
mod model;

pub use arc_length::ArcLength;
pub use convergence::ConvergenceTest;
pub use driver::{StaticAnalysis, StepReport};
pub use integrator::{IntegratorContext, IntegratorState, StaticIntegrator};
pub use linear_system::{DenseSystem, LinearSystem};
pub use load_control::LoadControl;
pub use model::AnalysisModel;
