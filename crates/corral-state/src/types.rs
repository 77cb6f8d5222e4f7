//! Domain types for the Corral state store.
//!
//! These types represent the fleet records the engines read: hosts,
//! primary storage pools, volumes and capacity ledger rows. All types are
//! serializable to/from JSON for storage in redb tables.

use std::fmt;

use serde::{Deserialize, Serialize};

use corral_core::{
    ClusterId, EpochSecs, HostId, PodId, PoolId, ResourceType, ScopeId, ScopeLevel, ScopeRef,
    VolumeId, ZoneId,
};

// ── Host ──────────────────────────────────────────────────────────

/// Last-known connection status of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Up,
    Down,
    Disconnected,
    Unknown,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HostStatus::Up => "Up",
            HostStatus::Down => "Down",
            HostStatus::Disconnected => "Disconnected",
            HostStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Hypervisor family a host runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypervisorFamily {
    Kvm,
    Lxc,
    XenServer,
    VMware,
    HyperV,
    Ovm3,
    Simulator,
    External,
}

/// Probe capability shared by a set of hypervisor families.
///
/// Hosts in the same group understand the same liveness and storage
/// activity commands, so they can observe each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeGroup {
    /// libvirt-managed hosts (KVM and LXC).
    Libvirt,
}

impl HypervisorFamily {
    /// The probe group this family belongs to, if it supports liveness probing.
    pub fn probe_group(self) -> Option<ProbeGroup> {
        match self {
            HypervisorFamily::Kvm | HypervisorFamily::Lxc => Some(ProbeGroup::Libvirt),
            _ => None,
        }
    }

    /// Whether a host of `other` family can act as a neighbor for this one.
    pub fn is_compatible_with(self, other: HypervisorFamily) -> bool {
        match (self.probe_group(), other.probe_group()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for HypervisorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HypervisorFamily::Kvm => "KVM",
            HypervisorFamily::Lxc => "LXC",
            HypervisorFamily::XenServer => "XenServer",
            HypervisorFamily::VMware => "VMware",
            HypervisorFamily::HyperV => "Hyperv",
            HypervisorFamily::Ovm3 => "Ovm3",
            HypervisorFamily::Simulator => "Simulator",
            HypervisorFamily::External => "External",
        };
        f.write_str(s)
    }
}

/// A hypervisor host in the fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Host {
    pub id: HostId,
    pub name: String,
    pub family: HypervisorFamily,
    pub zone_id: ZoneId,
    pub pod_id: PodId,
    pub cluster_id: ClusterId,
    pub status: HostStatus,
    /// Unix timestamp of the last agent ping.
    pub last_ping: EpochSecs,
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host {} ({})", self.id, self.name)
    }
}

// ── Storage ───────────────────────────────────────────────────────

/// Reach of a primary storage pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolScope {
    /// Shared by every host in one cluster.
    Cluster,
    /// Shared by every host in one zone.
    Zone,
    /// Local disk of a single host.
    Host,
}

/// A primary storage pool holding volumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoragePool {
    pub id: PoolId,
    pub name: String,
    pub scope: PoolScope,
    pub zone_id: ZoneId,
    /// Set for cluster-scoped and host-local pools.
    pub cluster_id: Option<ClusterId>,
    /// Set for host-local pools.
    pub host_id: Option<HostId>,
}

impl StoragePool {
    /// Whether `host` has an access path to this pool.
    pub fn is_reachable_from(&self, host: &Host) -> bool {
        match self.scope {
            PoolScope::Zone => host.zone_id == self.zone_id,
            PoolScope::Cluster => self.cluster_id == Some(host.cluster_id),
            PoolScope::Host => self.host_id == Some(host.id),
        }
    }
}

impl fmt::Display for StoragePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool {} ({})", self.id, self.name)
    }
}

/// A volume attached to a VM, stored on exactly one pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Volume {
    pub id: VolumeId,
    pub name: String,
    pub pool_id: PoolId,
    /// Host currently running the VM the volume belongs to.
    pub host_id: HostId,
    pub vm_id: u64,
    /// Backend path (e.g. the qcow2/RBD image name), used by activity checks.
    pub path: String,
}

// ── Capacity ──────────────────────────────────────────────────────

/// Whether a capacity row takes part in placement and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityState {
    #[default]
    Enabled,
    Disabled,
}

/// One ledger row: used/total capacity of a resource type at one scope.
///
/// The row's scope is the deepest id set in its path: a row with a
/// `host_id` is host-level, one with only `cluster_id` (plus parents)
/// is cluster-level, and so on. Parent ids are always filled in so rows
/// can be aggregated upward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapacityRecord {
    pub zone_id: ZoneId,
    pub pod_id: Option<PodId>,
    pub cluster_id: Option<ClusterId>,
    pub host_id: Option<HostId>,
    pub resource_type: ResourceType,
    pub used_amount: u64,
    pub reserved_amount: u64,
    /// Physical total; overcommit is applied by the accountant.
    pub total_amount: u64,
    #[serde(default)]
    pub state: CapacityState,
    /// Unix timestamp of the last recount.
    pub updated_at: EpochSecs,
}

impl CapacityRecord {
    /// Aggregation level this row belongs to.
    pub fn scope_level(&self) -> ScopeLevel {
        if self.host_id.is_some() {
            ScopeLevel::Host
        } else if self.cluster_id.is_some() {
            ScopeLevel::Cluster
        } else if self.pod_id.is_some() {
            ScopeLevel::Pod
        } else {
            ScopeLevel::Zone
        }
    }

    /// Id at this row's own level.
    pub fn scope_id(&self) -> ScopeId {
        match self.scope_level() {
            ScopeLevel::Host => self.host_id.unwrap_or_default(),
            ScopeLevel::Cluster => self.cluster_id.unwrap_or_default(),
            ScopeLevel::Pod => self.pod_id.unwrap_or_default(),
            ScopeLevel::Zone => self.zone_id,
        }
    }

    pub fn scope(&self) -> ScopeRef {
        ScopeRef {
            level: self.scope_level(),
            id: self.scope_id(),
        }
    }

    /// Id of the enclosing scope at `level`, if this row sits at or below it.
    pub fn id_at(&self, level: ScopeLevel) -> Option<ScopeId> {
        match level {
            ScopeLevel::Zone => Some(self.zone_id),
            ScopeLevel::Pod => self.pod_id,
            ScopeLevel::Cluster => self.cluster_id,
            ScopeLevel::Host => self.host_id,
        }
    }

    /// Whether this row is counted in the aggregate of `scope`.
    pub fn belongs_to(&self, scope: ScopeRef) -> bool {
        self.id_at(scope.level) == Some(scope.id)
    }

    pub fn is_enabled(&self) -> bool {
        self.state == CapacityState::Enabled
    }

    /// Build the composite key for the capacity table.
    pub fn table_key(&self) -> String {
        capacity_key(self.scope(), self.resource_type)
    }
}

/// Composite key for a capacity row.
pub fn capacity_key(scope: ScopeRef, resource: ResourceType) -> String {
    format!("{}/{:020}/{:03}", scope.level, scope.id, resource.code())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(id: HostId, family: HypervisorFamily) -> Host {
        Host {
            id,
            name: format!("h{id}"),
            family,
            zone_id: 1,
            pod_id: 1,
            cluster_id: 10,
            status: HostStatus::Up,
            last_ping: 0,
        }
    }

    fn record(cluster: Option<ClusterId>, host: Option<HostId>) -> CapacityRecord {
        CapacityRecord {
            zone_id: 1,
            pod_id: Some(2),
            cluster_id: cluster,
            host_id: host,
            resource_type: ResourceType::Cpu,
            used_amount: 0,
            reserved_amount: 0,
            total_amount: 100,
            state: CapacityState::Enabled,
            updated_at: 0,
        }
    }

    #[test]
    fn libvirt_families_are_compatible() {
        assert!(HypervisorFamily::Kvm.is_compatible_with(HypervisorFamily::Lxc));
        assert!(HypervisorFamily::Lxc.is_compatible_with(HypervisorFamily::Kvm));
        assert!(!HypervisorFamily::Kvm.is_compatible_with(HypervisorFamily::VMware));
        assert!(!HypervisorFamily::XenServer.is_compatible_with(HypervisorFamily::XenServer));
    }

    #[test]
    fn pool_reachability_follows_scope() {
        let h = host(5, HypervisorFamily::Kvm);
        let mut pool = StoragePool {
            id: 1,
            name: "nfs".to_string(),
            scope: PoolScope::Cluster,
            zone_id: 1,
            cluster_id: Some(10),
            host_id: None,
        };
        assert!(pool.is_reachable_from(&h));

        pool.cluster_id = Some(11);
        assert!(!pool.is_reachable_from(&h));

        pool.scope = PoolScope::Zone;
        assert!(pool.is_reachable_from(&h));

        pool.scope = PoolScope::Host;
        pool.host_id = Some(6);
        assert!(!pool.is_reachable_from(&h));
        pool.host_id = Some(5);
        assert!(pool.is_reachable_from(&h));
    }

    #[test]
    fn record_scope_is_deepest_id() {
        assert_eq!(record(Some(3), Some(9)).scope(), ScopeRef::host(9));
        assert_eq!(record(Some(3), None).scope(), ScopeRef::cluster(3));

        let mut pod_row = record(None, None);
        assert_eq!(pod_row.scope(), ScopeRef::pod(2));
        pod_row.pod_id = None;
        assert_eq!(pod_row.scope(), ScopeRef::zone(1));
    }

    #[test]
    fn host_row_belongs_to_all_parents() {
        let row = record(Some(3), Some(9));
        assert!(row.belongs_to(ScopeRef::zone(1)));
        assert!(row.belongs_to(ScopeRef::pod(2)));
        assert!(row.belongs_to(ScopeRef::cluster(3)));
        assert!(row.belongs_to(ScopeRef::host(9)));
        assert!(!row.belongs_to(ScopeRef::cluster(4)));
    }

    #[test]
    fn capacity_key_sorts_by_id() {
        let a = capacity_key(ScopeRef::cluster(2), ResourceType::Cpu);
        let b = capacity_key(ScopeRef::cluster(10), ResourceType::Cpu);
        assert!(a < b);
        assert_eq!(a, "cluster/00000000000000000002/001");
    }
}
