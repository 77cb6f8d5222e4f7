//! corral.toml configuration parser.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::types::{ClusterId, ResourceType};

const DEFAULT_PROBE_TIMEOUT: &str = "10s";
const DEFAULT_ACTIVITY_CHECK_TIMEOUT: &str = "30s";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CorralConfig {
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub capacity: CapacityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LivenessConfig {
    /// Timeout for a single check-on-host probe (e.g., "10s").
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: String,
    /// Timeout for a single storage activity check.
    #[serde(default = "default_activity_check_timeout")]
    pub activity_check_timeout: String,
    /// Forwarded to agents: a failed storage heartbeat means the host is down.
    #[serde(default)]
    pub fence_on_storage_heartbeat_failure: bool,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            probe_timeout: default_probe_timeout(),
            activity_check_timeout: default_activity_check_timeout(),
            fence_on_storage_heartbeat_failure: false,
        }
    }
}

fn default_probe_timeout() -> String {
    DEFAULT_PROBE_TIMEOUT.to_string()
}

fn default_activity_check_timeout() -> String {
    DEFAULT_ACTIVITY_CHECK_TIMEOUT.to_string()
}

/// Liveness settings with durations resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessSettings {
    pub probe_timeout: Duration,
    pub activity_check_timeout: Duration,
    pub fence_on_storage_heartbeat_failure: bool,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(10),
            activity_check_timeout: Duration::from_secs(30),
            fence_on_storage_heartbeat_failure: false,
        }
    }
}

impl LivenessConfig {
    /// Resolve duration strings into a [`LivenessSettings`].
    pub fn settings(&self) -> ConfigResult<LivenessSettings> {
        Ok(LivenessSettings {
            probe_timeout: require_duration("liveness.probe_timeout", &self.probe_timeout)?,
            activity_check_timeout: require_duration(
                "liveness.activity_check_timeout",
                &self.activity_check_timeout,
            )?,
            fence_on_storage_heartbeat_failure: self.fence_on_storage_heartbeat_failure,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CapacityConfig {
    /// Default overcommit ratio per resource type (missing = 1.0).
    #[serde(default)]
    pub overcommit: BTreeMap<String, f64>,
    /// Per-cluster overcommit ratios, taking precedence over the defaults.
    #[serde(default)]
    pub cluster_overcommit: Vec<ClusterOverride>,
    /// Default trigger fraction per resource type for threshold crossing.
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,
    /// Per-cluster trigger fractions.
    #[serde(default)]
    pub cluster_thresholds: Vec<ClusterOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterOverride {
    pub cluster_id: ClusterId,
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
}

impl CapacityConfig {
    /// Default overcommit ratios keyed by resource type.
    pub fn overcommit_ratios(&self) -> ConfigResult<BTreeMap<ResourceType, f64>> {
        resource_table("capacity.overcommit", &self.overcommit, check_ratio)
    }

    /// Default threshold triggers keyed by resource type.
    pub fn threshold_triggers(&self) -> ConfigResult<BTreeMap<ResourceType, f64>> {
        resource_table("capacity.thresholds", &self.thresholds, check_trigger)
    }

    pub fn cluster_overcommit_ratios(
        &self,
    ) -> ConfigResult<BTreeMap<ClusterId, BTreeMap<ResourceType, f64>>> {
        cluster_tables("capacity.cluster_overcommit", &self.cluster_overcommit, check_ratio)
    }

    pub fn cluster_threshold_triggers(
        &self,
    ) -> ConfigResult<BTreeMap<ClusterId, BTreeMap<ResourceType, f64>>> {
        cluster_tables("capacity.cluster_thresholds", &self.cluster_thresholds, check_trigger)
    }
}

fn resource_table(
    prefix: &str,
    raw: &BTreeMap<String, f64>,
    check: fn(&str, f64) -> ConfigResult<()>,
) -> ConfigResult<BTreeMap<ResourceType, f64>> {
    let mut table = BTreeMap::new();
    for (key, value) in raw {
        let full_key = format!("{prefix}.{key}");
        let resource: ResourceType = key
            .parse()
            .map_err(|_| ConfigError::invalid(&full_key, "unknown resource type"))?;
        check(&full_key, *value)?;
        table.insert(resource, *value);
    }
    Ok(table)
}

fn cluster_tables(
    prefix: &str,
    entries: &[ClusterOverride],
    check: fn(&str, f64) -> ConfigResult<()>,
) -> ConfigResult<BTreeMap<ClusterId, BTreeMap<ResourceType, f64>>> {
    let mut tables: BTreeMap<ClusterId, BTreeMap<ResourceType, f64>> = BTreeMap::new();
    for entry in entries {
        let table = resource_table(&format!("{prefix}[{}]", entry.cluster_id), &entry.values, check)?;
        // Later entries for the same cluster win key by key.
        tables.entry(entry.cluster_id).or_default().extend(table);
    }
    Ok(tables)
}

impl CorralConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        debug!(?path, "config loaded");
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: CorralConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::invalid("config", e.to_string()))
    }

    /// Reject values that would make the engine's arithmetic meaningless.
    pub fn validate(&self) -> ConfigResult<()> {
        self.liveness.settings()?;
        self.capacity.overcommit_ratios()?;
        self.capacity.cluster_overcommit_ratios()?;
        self.capacity.threshold_triggers()?;
        self.capacity.cluster_threshold_triggers()?;
        Ok(())
    }
}

fn check_ratio(key: &str, ratio: f64) -> ConfigResult<()> {
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(ConfigError::invalid(key, format!("overcommit ratio must be > 0, got {ratio}")));
    }
    Ok(())
}

fn check_trigger(key: &str, trigger: f64) -> ConfigResult<()> {
    if !trigger.is_finite() || trigger <= 0.0 || trigger > 1.0 {
        return Err(ConfigError::invalid(key, format!("threshold must be in (0, 1], got {trigger}")));
    }
    Ok(())
}

fn require_duration(key: &str, value: &str) -> ConfigResult<Duration> {
    match parse_duration(value) {
        Some(d) if !d.is_zero() => Ok(d),
        Some(_) => Err(ConfigError::invalid(key, "timeout must be non-zero")),
        None => Err(ConfigError::invalid(key, format!("cannot parse duration {value:?}"))),
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
