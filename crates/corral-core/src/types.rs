//! Shared types used across Corral crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Identifier of a zone (data center).
pub type ZoneId = u64;

/// Identifier of a pod inside a zone.
pub type PodId = u64;

/// Identifier of a cluster inside a pod.
pub type ClusterId = u64;

/// Identifier of a hypervisor host.
pub type HostId = u64;

/// Identifier of a primary storage pool.
pub type PoolId = u64;

/// Identifier of a volume.
pub type VolumeId = u64;

/// Identifier of a scope entry at any level (zone, pod, cluster or host id).
pub type ScopeId = u64;

/// Unix timestamp in seconds.
pub type EpochSecs = u64;

/// Kind of capacity tracked by the ledger.
///
/// Discriminants follow the capacity-type numbering used by the fleet
/// database, so records keep their meaning when exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Memory = 0,
    Cpu = 1,
    Storage = 2,
    StorageAllocated = 3,
    PublicIp = 4,
    PrivateIp = 5,
    SecondaryStorage = 6,
    Vlan = 7,
    DirectAttachedPublicIp = 8,
    LocalStorage = 9,
    Gpu = 19,
    CpuCore = 90,
}

impl ResourceType {
    pub const ALL: [ResourceType; 12] = [
        ResourceType::Memory,
        ResourceType::Cpu,
        ResourceType::Storage,
        ResourceType::StorageAllocated,
        ResourceType::PublicIp,
        ResourceType::PrivateIp,
        ResourceType::SecondaryStorage,
        ResourceType::Vlan,
        ResourceType::DirectAttachedPublicIp,
        ResourceType::LocalStorage,
        ResourceType::Gpu,
        ResourceType::CpuCore,
    ];

    /// Numeric capacity-type code.
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Memory => "memory",
            ResourceType::Cpu => "cpu",
            ResourceType::Storage => "storage",
            ResourceType::StorageAllocated => "storage_allocated",
            ResourceType::PublicIp => "public_ip",
            ResourceType::PrivateIp => "private_ip",
            ResourceType::SecondaryStorage => "secondary_storage",
            ResourceType::Vlan => "vlan",
            ResourceType::DirectAttachedPublicIp => "direct_attached_public_ip",
            ResourceType::LocalStorage => "local_storage",
            ResourceType::Gpu => "gpu",
            ResourceType::CpuCore => "cpu_core",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| ConfigError::UnknownResourceType(s.to_string()))
    }
}

/// Aggregation level of a capacity scope, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeLevel {
    Zone,
    Pod,
    Cluster,
    Host,
}

impl ScopeLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ScopeLevel::Zone => "zone",
            ScopeLevel::Pod => "pod",
            ScopeLevel::Cluster => "cluster",
            ScopeLevel::Host => "host",
        }
    }
}

impl fmt::Display for ScopeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zone" => Ok(ScopeLevel::Zone),
            "pod" => Ok(ScopeLevel::Pod),
            "cluster" => Ok(ScopeLevel::Cluster),
            "host" => Ok(ScopeLevel::Host),
            _ => Err(ConfigError::UnknownScopeLevel(s.to_string())),
        }
    }
}

/// A concrete scope entry: a level plus the id at that level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeRef {
    pub level: ScopeLevel,
    pub id: ScopeId,
}

impl ScopeRef {
    pub fn zone(id: ZoneId) -> Self {
        Self { level: ScopeLevel::Zone, id }
    }

    pub fn pod(id: PodId) -> Self {
        Self { level: ScopeLevel::Pod, id }
    }

    pub fn cluster(id: ClusterId) -> Self {
        Self { level: ScopeLevel::Cluster, id }
    }

    pub fn host(id: HostId) -> Self {
        Self { level: ScopeLevel::Host, id }
    }
}

impl fmt::Display for ScopeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.level, self.id)
    }
}
