//! Corral capacity accounting — ranking and alert predicates over the ledger.
//!
//! This crate never writes capacity. It reads one self-consistent
//! snapshot of the ledger per call and turns it into deterministic
//! orderings (for placement) or boolean predicates (for alerting).
//!
//! # Components
//!
//! - **`ledger`** — snapshot of capacity rows plus the aggregation arithmetic
//! - **`accountant`** — ranking, VM fit, threshold crossing, consumption projection
//! - **`error`** — capacity error taxonomy

pub mod accountant;
pub mod error;
pub mod ledger;

pub use accountant::{CapacityAccountant, FitRequest, Ranking};
pub use error::{CapacityError, CapacityResult};
pub use ledger::{CapacityLedger, ScopeCapacity};
