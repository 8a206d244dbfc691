//! Strand Tests - deterministic multi-component testing for strand.
//!
//! ## Test Organization
//!
//! **DST Tests** (`*_dst.rs`): seeded random workloads with invariant checks
//! - `work_tracking_dst`: `WorkManager` driven by a seeded workload model
//!
//! **Integration Tests** (`*_tests.rs`): multi-component scenarios
//! - `rebalance_tests`: revocation, loss, and restore from committed metadata
//! - `controller_tests`: the control loop against the simulated broker
//!
//! **Support Modules**:
//! - `properties`: invariant definitions and the property checker
//! - `scenarios`: seeds and record generation
//! - `workload`: the seeded workload driver
//!
//! ## Naming Conventions
//!
//! - DST tests: `test_dst_<component>_<scenario>`
//! - Integration tests: `test_<component>_<scenario>`
//! - Unit tests: Inline in each crate under `#[cfg(test)]`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod properties;
pub mod scenarios;
pub mod workload;

#[cfg(test)]
mod work_tracking_dst;

#[cfg(test)]
mod rebalance_tests;
