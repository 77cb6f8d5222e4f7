//! corral-state — fleet state for Corral.
//!
//! Backed by [redb](https://docs.rs/redb), stores the records the
//! liveness and capacity engines read: hosts, primary storage pools,
//! volumes and capacity ledger rows.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Hosts, pools and volumes are keyed by their numeric id; capacity rows
//! use a composite `{level}/{scope_id}/{type_code}` key.
//!
//! The engines never talk to the store directly. They consume the read
//! ports in [`ports`] ([`FleetMembership`], [`VolumeCatalog`],
//! [`CapacityLedgerReader`]), which `StateStore` implements. Any other
//! backend only has to implement those three traits.

pub mod error;
pub mod ports;
pub mod store;
pub mod tables;
pub mod types;

pub use corral_core::{
    ClusterId, EpochSecs, HostId, PodId, PoolId, ResourceType, ScopeId, ScopeLevel, ScopeRef,
    VolumeId, ZoneId,
};
pub use error::{StateError, StateResult};
pub use ports::{CapacityLedgerReader, FleetMembership, VolumeCatalog, is_up};
pub use store::StateStore;
pub use types::*;
