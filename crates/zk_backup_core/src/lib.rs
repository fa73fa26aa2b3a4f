//! Shared ZooKeeper backup domain primitives.
//!
//! This crate owns the snapshot and backup-record contracts, object key
//! derivation, configuration parsing, and retention selection. Nothing here
//! depends on the AWS SDK, HTTP, or the Lambda runtime.

pub mod config;
pub mod contract;
pub mod retention;
pub mod storage_keys;
