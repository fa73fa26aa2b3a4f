//! AWS-oriented adapters and handlers for the scheduled ZooKeeper backup.
//!
//! This crate owns runtime integration details (the admin-endpoint client,
//! the object store writer, the retrying orchestrator, and the Lambda entry
//! point) and exposes a single runtime module boundary for contract, key, and
//! configuration primitives.

pub mod adapters;
pub mod handlers;
pub mod runtime;
pub mod telemetry;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
