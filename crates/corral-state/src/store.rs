//! StateStore — redb-backed persistence for Corral fleet state.
//!
//! Provides typed CRUD operations over hosts, storage pools, volumes and
//! capacity rows. All values are JSON-serialized into redb's `&[u8]`
//! value columns. The store supports both on-disk and in-memory backends
//! (the latter for testing).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use corral_core::{ClusterId, HostId, PoolId, ScopeRef, VolumeId};

use crate::error::{StateError, StateResult};
use crate::ports::{CapacityLedgerReader, FleetMembership, VolumeCatalog, is_up};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(HOSTS).map_err(map_err!(Table))?;
        txn.open_table(STORAGE_POOLS).map_err(map_err!(Table))?;
        txn.open_table(VOLUMES).map_err(map_err!(Table))?;
        txn.open_table(CAPACITY).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Hosts ──────────────────────────────────────────────────────

    /// Insert or update a host.
    pub fn put_host(&self, host: &Host) -> StateResult<()> {
        let value = encode(host)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(HOSTS).map_err(map_err!(Table))?;
            table
                .insert(host.id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(host_id = host.id, status = %host.status, "host stored");
        Ok(())
    }

    pub fn get_host(&self, id: HostId) -> StateResult<Option<Host>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HOSTS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List all hosts, ordered by id.
    pub fn list_hosts(&self) -> StateResult<Vec<Host>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HOSTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// List hosts in a cluster regardless of status, ordered by id.
    pub fn list_hosts_in_cluster(&self, cluster: ClusterId) -> StateResult<Vec<Host>> {
        Ok(self
            .list_hosts()?
            .into_iter()
            .filter(|h| h.cluster_id == cluster)
            .collect())
    }

    /// Delete a host by id. Returns true if it existed.
    pub fn delete_host(&self, id: HostId) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(HOSTS).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(host_id = id, existed, "host deleted");
        Ok(existed)
    }

    // ── Storage pools ──────────────────────────────────────────────

    pub fn put_pool(&self, pool: &StoragePool) -> StateResult<()> {
        let value = encode(pool)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(STORAGE_POOLS).map_err(map_err!(Table))?;
            table
                .insert(pool.id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(pool_id = pool.id, "storage pool stored");
        Ok(())
    }

    pub fn get_pool(&self, id: PoolId) -> StateResult<Option<StoragePool>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STORAGE_POOLS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn list_pools(&self) -> StateResult<Vec<StoragePool>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STORAGE_POOLS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    pub fn delete_pool(&self, id: PoolId) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(STORAGE_POOLS).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Volumes ────────────────────────────────────────────────────

    pub fn put_volume(&self, volume: &Volume) -> StateResult<()> {
        let value = encode(volume)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(VOLUMES).map_err(map_err!(Table))?;
            table
                .insert(volume.id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn get_volume(&self, id: VolumeId) -> StateResult<Option<Volume>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(VOLUMES).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List volumes whose VM currently runs on `host`, ordered by id.
    pub fn list_volumes_on_host(&self, host: HostId) -> StateResult<Vec<Volume>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(VOLUMES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let volume: Volume = decode(value.value())?;
            if volume.host_id == host {
                results.push(volume);
            }
        }
        Ok(results)
    }

    pub fn delete_volume(&self, id: VolumeId) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(VOLUMES).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Capacity ───────────────────────────────────────────────────

    /// Insert or update a capacity row.
    pub fn put_capacity(&self, record: &CapacityRecord) -> StateResult<()> {
        let key = record.table_key();
        let value = encode(record)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CAPACITY).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "capacity row stored");
        Ok(())
    }

    /// Insert or update many capacity rows in one transaction.
    pub fn put_capacities(&self, records: &[CapacityRecord]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CAPACITY).map_err(map_err!(Table))?;
            for record in records {
                let key = record.table_key();
                let value = encode(record)?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count = records.len(), "capacity rows stored");
        Ok(())
    }

    pub fn get_capacity(
        &self,
        scope: ScopeRef,
        resource: corral_core::ResourceType,
    ) -> StateResult<Option<CapacityRecord>> {
        let key = capacity_key(scope, resource);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CAPACITY).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List every capacity row in key order.
    pub fn list_capacity(&self) -> StateResult<Vec<CapacityRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CAPACITY).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    pub fn delete_capacity(
        &self,
        scope: ScopeRef,
        resource: corral_core::ResourceType,
    ) -> StateResult<bool> {
        let key = capacity_key(scope, resource);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(CAPACITY).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }
}

impl FleetMembership for StateStore {
    fn up_hosts_in_cluster(&self, cluster: ClusterId) -> StateResult<Vec<Host>> {
        Ok(self
            .list_hosts_in_cluster(cluster)?
            .into_iter()
            .filter(is_up)
            .collect())
    }
}

impl VolumeCatalog for StateStore {
    fn volumes_on_host(&self, host: HostId) -> StateResult<Vec<Volume>> {
        self.list_volumes_on_host(host)
    }

    fn pool_of_volume(&self, volume: VolumeId) -> StateResult<StoragePool> {
        let vol = self
            .get_volume(volume)?
            .ok_or(StateError::NotFound {
                kind: "volume",
                id: volume,
            })?;
        self.get_pool(vol.pool_id)?.ok_or(StateError::NotFound {
            kind: "storage pool",
            id: vol.pool_id,
        })
    }
}

impl CapacityLedgerReader for StateStore {
    /// Rows of a host whose last-known status is not `Up` are returned as
    /// `Disabled`. Rows of hosts without a host record are returned as stored.
    fn records_within(&self, within: Option<ScopeRef>) -> StateResult<Vec<CapacityRecord>> {
        // A single read transaction keeps the snapshot self-consistent.
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CAPACITY).map_err(map_err!(Table))?;
        let hosts = txn.open_table(HOSTS).map_err(map_err!(Table))?;
        let mut host_up: BTreeMap<HostId, bool> = BTreeMap::new();
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let mut record: CapacityRecord = decode(value.value())?;
            if !within.is_none_or(|scope| record.belongs_to(scope)) {
                continue;
            }
            if let Some(host_id) = record.host_id {
                let up = match host_up.get(&host_id) {
                    Some(up) => *up,
                    None => {
                        let up = match hosts.get(host_id).map_err(map_err!(Read))? {
                            Some(guard) => is_up(&decode::<Host>(guard.value())?),
                            None => true,
                        };
                        host_up.insert(host_id, up);
                        up
                    }
                };
                if !up && record.is_enabled() {
                    debug!(host_id, resource = %record.resource_type, "host not up, capacity row disabled");
                    record.state = CapacityState::Disabled;
                }
            }
            results.push(record);
        }
        Ok(results)
    }
}
