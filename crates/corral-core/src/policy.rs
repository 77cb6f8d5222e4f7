//! Overcommit and threshold policies resolved from [`CapacityConfig`].
//!
//! Both policies answer the same question shape: "what value applies to
//! this resource type in this cluster?". A per-cluster override wins over
//! the per-type default, which wins over the built-in fallback.

use std::collections::BTreeMap;

use crate::config::CapacityConfig;
use crate::error::ConfigResult;
use crate::types::{ClusterId, ResourceType};

/// Trigger used when neither the cluster nor the type configures one.
pub const DEFAULT_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, Default, PartialEq)]
struct ScopedTable {
    defaults: BTreeMap<ResourceType, f64>,
    clusters: BTreeMap<ClusterId, BTreeMap<ResourceType, f64>>,
}

impl ScopedTable {
    fn lookup(&self, resource: ResourceType, cluster: Option<ClusterId>) -> Option<f64> {
        cluster
            .and_then(|c| self.clusters.get(&c))
            .and_then(|table| table.get(&resource))
            .or_else(|| self.defaults.get(&resource))
            .copied()
    }
}

/// Multiplier applied to physical capacity to get allocatable capacity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OvercommitPolicy {
    table: ScopedTable,
}

impl OvercommitPolicy {
    pub fn from_config(config: &CapacityConfig) -> ConfigResult<Self> {
        Ok(Self {
            table: ScopedTable {
                defaults: config.overcommit_ratios()?,
                clusters: config.cluster_overcommit_ratios()?,
            },
        })
    }

    /// Set the default ratio for a resource type.
    pub fn with_ratio(mut self, resource: ResourceType, ratio: f64) -> Self {
        self.table.defaults.insert(resource, ratio);
        self
    }

    /// Set a cluster-specific ratio for a resource type.
    pub fn with_cluster_ratio(mut self, cluster: ClusterId, resource: ResourceType, ratio: f64) -> Self {
        self.table.clusters.entry(cluster).or_default().insert(resource, ratio);
        self
    }

    /// Ratio for `resource` in `cluster`; 1.0 when nothing is configured.
    pub fn ratio(&self, resource: ResourceType, cluster: Option<ClusterId>) -> f64 {
        self.table.lookup(resource, cluster).unwrap_or(1.0)
    }
}

/// Trigger fractions used by threshold-crossing alerts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdPolicy {
    table: ScopedTable,
}

impl ThresholdPolicy {
    pub fn from_config(config: &CapacityConfig) -> ConfigResult<Self> {
        Ok(Self {
            table: ScopedTable {
                defaults: config.threshold_triggers()?,
                clusters: config.cluster_threshold_triggers()?,
            },
        })
    }

    pub fn with_trigger(mut self, resource: ResourceType, trigger: f64) -> Self {
        self.table.defaults.insert(resource, trigger);
        self
    }

    pub fn with_cluster_trigger(mut self, cluster: ClusterId, resource: ResourceType, trigger: f64) -> Self {
        self.table.clusters.entry(cluster).or_default().insert(resource, trigger);
        self
    }

    /// Trigger fraction for `resource` in `cluster`.
    pub fn trigger(&self, resource: ResourceType, cluster: ClusterId) -> f64 {
        self.table.lookup(resource, Some(cluster)).unwrap_or(DEFAULT_THRESHOLD)
    }
}
