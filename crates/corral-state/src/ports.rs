//! Read ports consumed by the liveness and capacity engines.
//!
//! Each call is expected to return current data; the engines re-fetch on
//! every investigation or ranking call and never cache what they read.

use corral_core::{ClusterId, HostId, ResourceType, ScopeLevel, ScopeRef, VolumeId};

use crate::error::StateResult;
use crate::types::{CapacityRecord, Host, HostStatus, StoragePool, Volume};

/// Fleet membership: which hosts exist and which are up.
pub trait FleetMembership: Send + Sync {
    /// Hosts in `cluster` whose last-known status is `Up`, ordered by id.
    fn up_hosts_in_cluster(&self, cluster: ClusterId) -> StateResult<Vec<Host>>;
}

/// Volume and pool lookups for a host's running VMs.
pub trait VolumeCatalog: Send + Sync {
    /// Volumes of the VMs currently running on `host`.
    fn volumes_on_host(&self, host: HostId) -> StateResult<Vec<Volume>>;

    /// The pool a volume is stored on. Fails `NotFound` for unknown volumes or pools.
    fn pool_of_volume(&self, volume: VolumeId) -> StateResult<StoragePool>;
}

/// Read side of the capacity ledger.
pub trait CapacityLedgerReader: Send + Sync {
    /// Every row inside `within` (or the whole fleet), read as one snapshot.
    fn records_within(&self, within: Option<ScopeRef>) -> StateResult<Vec<CapacityRecord>>;

    /// Rows of one resource type aggregated under a single scope.
    fn records_for(
        &self,
        level: ScopeLevel,
        id: u64,
        resource: ResourceType,
    ) -> StateResult<Vec<CapacityRecord>> {
        let scope = ScopeRef { level, id };
        Ok(self
            .records_within(Some(scope))?
            .into_iter()
            .filter(|r| r.resource_type == resource)
            .collect())
    }
}

/// Filter for hosts that can currently answer probes.
pub fn is_up(host: &Host) -> bool {
    host.status == HostStatus::Up
}

impl<T: FleetMembership + ?Sized> FleetMembership for std::sync::Arc<T> {
    fn up_hosts_in_cluster(&self, cluster: ClusterId) -> StateResult<Vec<Host>> {
        (**self).up_hosts_in_cluster(cluster)
    }
}

impl<T: VolumeCatalog + ?Sized> VolumeCatalog for std::sync::Arc<T> {
    fn volumes_on_host(&self, host: HostId) -> StateResult<Vec<Volume>> {
        (**self).volumes_on_host(host)
    }

    fn pool_of_volume(&self, volume: VolumeId) -> StateResult<StoragePool> {
        (**self).pool_of_volume(volume)
    }
}

impl<T: CapacityLedgerReader + ?Sized> CapacityLedgerReader for std::sync::Arc<T> {
    fn records_within(&self, within: Option<ScopeRef>) -> StateResult<Vec<CapacityRecord>> {
        (**self).records_within(within)
    }
}
