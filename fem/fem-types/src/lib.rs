//! Core types for the structural analysis kernel.
//!
//! This crate provides the vocabulary shared by every other `fem-*` crate:
//!
//! - Strongly typed tags ([`NodeTag`], [`ElementTag`], [`ConstraintTag`], ...)
//! - The error type [`FemError`] and the [`Result`] alias
//! - Analysis configuration ([`LoadControlConfig`], [`ArcLengthConfig`],
//!   [`ConvergenceConfig`], [`AnalysisConfig`])
//! - The persistence [`channel`] (with the `serde` feature)
//!
//! # Design Philosophy
//!
//! These types are **pure data**. They know nothing about nodes, elements or
//! linear systems; they are the common language between the domain container
//! (`fem-domain`) and the equilibrium-path controllers (`fem-analysis`).
//!
//! # Example
//!
//! ```
//! use fem_types::{ArcLengthConfig, ArcLengthStrategy, FemError, NodeTag};
//!
//! let config = ArcLengthConfig::new(0.05, ArcLengthStrategy::Cylindrical);
//! assert!(config.validate().is_ok());
//!
//! let err = FemError::NodeNotFound(NodeTag::new(4));
//! assert!(err.is_config_error());
//! assert!(err.status_code() < 0);
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn)]

#[cfg(feature = "serde")]
pub mod channel;
mod config;
mod error;
mod tags;

pub use config::{
    AnalysisConfig, ArcLengthConfig, ArcLengthStrategy, ConvergenceConfig, ConvergenceKind,
    LoadControlConfig, LocalControl, Numberer,
};
pub use error::FemError;
pub use tags::{ConstraintTag, ElementTag, LoadTag, LockerTag, NodeTag, PatternTag, Registry};

/// Result type for model and analysis operations.
pub type Result<T> = std::result::Result<T, FemError>;
