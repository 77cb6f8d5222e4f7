//! Capacity accounting error types.

use thiserror::Error;

use corral_core::{ResourceType, ScopeRef};

/// Errors that can occur while ranking or evaluating capacity.
#[derive(Debug, Error)]
pub enum CapacityError {
    #[error("ledger read failed: {0}")]
    Ledger(#[from] corral_state::StateError),

    /// A scope asked for by the caller has no enabled rows of the type.
    /// Never silently read as zero capacity.
    #[error("no enabled {resource} capacity records for {scope}")]
    MissingRecords {
        scope: ScopeRef,
        resource: ResourceType,
    },

    #[error("invalid scope: {0}")]
    InvalidScope(String),
}

pub type CapacityResult<T> = Result<T, CapacityError>;
