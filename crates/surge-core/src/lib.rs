//! surge-core — shared domain types and typed configuration.
//!
//! Every other surge crate depends on this one for the endpoint and
//! instance types and for the two configuration scopes (manager-wide,
//! per-endpoint). Configuration is strictly typed: defaults come from
//! `Default` impls and overrides are merged in by serde at load time,
//! so a missing optional key is a default value, never a runtime lookup
//! failure.

pub mod config;
pub mod types;

pub use config::{EndpointConfig, ManagerConfig, PoolSettings};
pub use types::*;
