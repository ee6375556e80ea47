//! # Nav Test Utilities
//!
//! Shared testing utilities for the movement core:
//! - Determinism test harness
//! - Grid and unit fixture helpers
//! - Property-based testing strategies

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod determinism;
pub mod fixtures;

/// Re-export proptest for convenience.
pub use proptest;
