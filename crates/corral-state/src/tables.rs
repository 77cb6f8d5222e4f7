//! redb table definitions for the Corral state store.
//!
//! Hosts, pools and volumes use their numeric id as key. Capacity rows
//! use `{level}/{scope_id:020}/{type_code:03}` so a prefix scan over
//! `{level}/` walks one aggregation level in id order.

use redb::TableDefinition;

/// Hosts keyed by host id.
pub const HOSTS: TableDefinition<u64, &[u8]> = TableDefinition::new("hosts");

/// Primary storage pools keyed by pool id.
pub const STORAGE_POOLS: TableDefinition<u64, &[u8]> = TableDefinition::new("storage_pools");

/// Volumes keyed by volume id.
pub const VOLUMES: TableDefinition<u64, &[u8]> = TableDefinition::new("volumes");

/// Capacity ledger rows keyed by `{level}/{scope_id}/{type_code}`.
pub const CAPACITY: TableDefinition<&str, &[u8]> = TableDefinition::new("capacity");
