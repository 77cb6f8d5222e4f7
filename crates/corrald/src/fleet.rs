//! Fleet inspection, snapshot import and config checking.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use corral_core::{ClusterId, CorralConfig};
use corral_state::{CapacityRecord, Host, StateStore, StoragePool, Volume};

use crate::print_json;

/// JSON document accepted by `corrald load`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetSnapshot {
    pub hosts: Vec<Host>,
    pub pools: Vec<StoragePool>,
    pub volumes: Vec<Volume>,
    pub capacity: Vec<CapacityRecord>,
}

pub fn load_snapshot(store: &StateStore, file: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)?;
    let snapshot: FleetSnapshot = serde_json::from_str(&content)?;
    import(store, &snapshot)?;
    info!(
        path = %file.display(),
        hosts = snapshot.hosts.len(),
        pools = snapshot.pools.len(),
        volumes = snapshot.volumes.len(),
        capacity = snapshot.capacity.len(),
        "fleet snapshot imported"
    );
    Ok(())
}

fn import(store: &StateStore, snapshot: &FleetSnapshot) -> anyhow::Result<()> {
    for host in &snapshot.hosts {
        store.put_host(host)?;
    }
    for pool in &snapshot.pools {
        store.put_pool(pool)?;
    }
    for volume in &snapshot.volumes {
        store.put_volume(volume)?;
    }
    store.put_capacities(&snapshot.capacity)?;
    Ok(())
}

pub fn list_hosts(store: &StateStore, cluster: ClusterId) -> anyhow::Result<()> {
    let hosts = store.list_hosts_in_cluster(cluster)?;
    print_json(&hosts)
}

#[derive(Serialize)]
struct EffectiveConfig {
    probe_timeout_ms: u128,
    activity_check_timeout_ms: u128,
    fence_on_storage_heartbeat_failure: bool,
    overcommit: serde_json::Value,
    cluster_overcommit: serde_json::Value,
    thresholds: serde_json::Value,
    cluster_thresholds: serde_json::Value,
}

pub fn check_config(config: &CorralConfig) -> anyhow::Result<()> {
    config.validate()?;
    let liveness = config.liveness.settings()?;
    let capacity = &config.capacity;
    print_json(&EffectiveConfig {
        probe_timeout_ms: liveness.probe_timeout.as_millis(),
        activity_check_timeout_ms: liveness.activity_check_timeout.as_millis(),
        fence_on_storage_heartbeat_failure: liveness.fence_on_storage_heartbeat_failure,
        overcommit: serde_json::to_value(capacity.overcommit_ratios()?)?,
        cluster_overcommit: serde_json::to_value(capacity.cluster_overcommit_ratios()?)?,
        thresholds: serde_json::to_value(capacity.threshold_triggers()?)?,
        cluster_thresholds: serde_json::to_value(capacity.cluster_threshold_triggers()?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::ResourceType;
    use corral_state::{CapacityState, HostStatus, HypervisorFamily};

    #[test]
    fn snapshot_imports_into_store() {
        let json = r#"{
            "hosts": [{
                "id": 1, "name": "kvm-01", "family": "kvm", "zone_id": 1, "pod_id": 1,
                "cluster_id": 3, "status": "up", "last_ping": 0
            }],
            "capacity": [{
                "zone_id": 1, "pod_id": 1, "cluster_id": 3, "host_id": 1,
                "resource_type": "cpu", "used_amount": 4, "reserved_amount": 0,
                "total_amount": 32, "state": "enabled", "updated_at": 0
            }]
        }"#;
        let snapshot: FleetSnapshot = serde_json::from_str(json).unwrap();
        let store = StateStore::open_in_memory().unwrap();
        import(&store, &snapshot).unwrap();

        let hosts = store.list_hosts_in_cluster(3).unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].family, HypervisorFamily::Kvm);
        assert_eq!(hosts[0].status, HostStatus::Up);

        let rows = store.list_capacity().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].resource_type, ResourceType::Cpu);
        assert_eq!(rows[0].state, CapacityState::Enabled);
    }

    #[test]
    fn default_config_checks() {
        assert!(check_config(&CorralConfig::default()).is_ok());
    }
}
