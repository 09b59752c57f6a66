//! # roster_core
//!
//! Core domain logic for Roster: token codec, authorization gates, the
//! bucket/document storage abstraction and the user store built on it.

pub mod auth;
pub mod ids;
pub mod loadgen;
pub mod metrics;
pub mod models;
pub mod storage;
pub mod users;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
