//! Pool access: which host can run a storage check, and which volumes
//! belong to which pool.

use std::collections::BTreeMap;
use std::sync::Arc;

use corral_core::{HostId, PoolId};
use corral_state::{Host, StoragePool, Volume};

/// Chooses the host that runs a storage activity check for a pool.
pub trait PoolAccessSelector: Send + Sync {
    /// Pick one of `candidates` with an access path to `pool`, or `None`.
    fn select_access_host(&self, pool: &StoragePool, candidates: &[Host]) -> Option<HostId>;
}

impl<T: PoolAccessSelector + ?Sized> PoolAccessSelector for Arc<T> {
    fn select_access_host(&self, pool: &StoragePool, candidates: &[Host]) -> Option<HostId> {
        (**self).select_access_host(pool, candidates)
    }
}

/// Selects the lowest-id candidate that can reach the pool given its scope.
///
/// Cluster pools need a host of the pool's cluster, zone pools a host of
/// the zone, host-local pools their owning host.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopedPoolAccess;

impl PoolAccessSelector for ScopedPoolAccess {
    fn select_access_host(&self, pool: &StoragePool, candidates: &[Host]) -> Option<HostId> {
        candidates
            .iter()
            .filter(|h| pool.is_reachable_from(h))
            .map(|h| h.id)
            .min()
    }
}

/// Group volumes by the pool that stores them.
///
/// Pools iterate in ascending id order and volumes are sorted by id within
/// each pool, so repeated calls over the same input agree.
pub fn group_volumes_by_pool(volumes: &[Volume]) -> BTreeMap<PoolId, Vec<Volume>> {
    let mut grouped: BTreeMap<PoolId, Vec<Volume>> = BTreeMap::new();
    for volume in volumes {
        grouped.entry(volume.pool_id).or_default().push(volume.clone());
    }
    for group in grouped.values_mut() {
        group.sort_by_key(|v| v.id);
    }
    grouped
}
