//! Test utilities for umbra nodes
//!
//! Fixtures and peer builders shared by unit tests, the integration
//! suite and local tooling.

pub mod fixtures;
pub mod peers;

pub use fixtures::*;
pub use peers::*;
