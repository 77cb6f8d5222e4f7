//! corral-core — shared vocabulary and configuration for Corral.
//!
//! Holds the identifiers and enums every other crate speaks
//! ([`ResourceType`], [`ScopeLevel`], id aliases) plus the `corral.toml`
//! parser and the overcommit/threshold policies derived from it.

pub mod config;
pub mod error;
pub mod policy;
pub mod types;

pub use config::{CapacityConfig, ClusterOverride, CorralConfig, LivenessConfig, LivenessSettings, parse_duration};
pub use error::{ConfigError, ConfigResult};
pub use policy::{DEFAULT_THRESHOLD, OvercommitPolicy, ThresholdPolicy};
pub use types::*;
