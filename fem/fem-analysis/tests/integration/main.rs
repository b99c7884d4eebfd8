//! Integration tests for the fem-* crates.
//!
//! These tests drive a complete domain through the analysis layer:
//! - Fixed-end bar reactions after one load-control step
//! - Load pattern removal and the change-tracking protocol
//! - Arc-length tracing of a snap-through truss past its limit point
//! - Persistence round trips between a running and a receiving domain

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

mod arc_length_path;
mod change_tracking;
mod common;
mod persistence;
mod scenarios;
