//! Capacity accountant — deterministic rankings and alert predicates.
//!
//! Every public operation reads exactly one ledger snapshot and is pure
//! arithmetic over it, so the accountant can be shared freely across
//! concurrent placement and alerting calls.
//!
//! Orderings sort by descending free capacity (`total × overcommit −
//! used − reserved`), ties broken by ascending scope id, so identical
//! snapshots always produce identical rankings.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use corral_core::{
    ClusterId, HostId, OvercommitPolicy, PodId, ResourceType, ScopeId, ScopeLevel, ScopeRef,
    ThresholdPolicy, ZoneId,
};
use corral_state::CapacityLedgerReader;

use crate::error::{CapacityError, CapacityResult};
use crate::ledger::{CapacityLedger, ScopeCapacity};

/// Ordered scope ids plus each id's free-capacity score.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Ranking {
    pub level: Option<ScopeLevel>,
    /// Best first.
    pub order: Vec<ScopeId>,
    /// Free capacity of the ranking resource, by id.
    pub scores: BTreeMap<ScopeId, f64>,
}

impl Ranking {
    fn from_scored(level: ScopeLevel, mut scored: Vec<(ScopeId, f64)>) -> Self {
        scored.sort_by(by_free_then_id);
        scored.dedup_by_key(|(id, _)| *id);
        Self {
            level: Some(level),
            order: scored.iter().map(|(id, _)| *id).collect(),
            scores: scored.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

fn by_free_then_id(a: &(ScopeId, f64), b: &(ScopeId, f64)) -> Ordering {
    b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
}

/// A request to find clusters or pods that can host a VM.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitRequest {
    /// CPU the VM needs, in ledger CPU units.
    pub cpu: u64,
    /// Memory the VM needs, in ledger memory units.
    pub memory: u64,
    /// Where to look: a zone, a pod, or a single cluster.
    pub within: ScopeRef,
    /// Granularity of the candidates: `Cluster` or `Pod`.
    pub level: ScopeLevel,
    /// Resource whose free capacity orders the result: `Cpu` or `Memory`.
    pub order_by: ResourceType,
}

/// Read-only ranking and threshold engine over a capacity ledger.
pub struct CapacityAccountant<R> {
    reader: R,
    overcommit: OvercommitPolicy,
    thresholds: ThresholdPolicy,
}

impl<R: CapacityLedgerReader> CapacityAccountant<R> {
    pub fn new(reader: R, overcommit: OvercommitPolicy, thresholds: ThresholdPolicy) -> Self {
        Self {
            reader,
            overcommit,
            thresholds,
        }
    }

    pub fn overcommit(&self) -> &OvercommitPolicy {
        &self.overcommit
    }

    pub fn thresholds(&self) -> &ThresholdPolicy {
        &self.thresholds
    }

    fn snapshot(&self, within: Option<ScopeRef>) -> CapacityResult<CapacityLedger> {
        CapacityLedger::load(&self.reader, within)
    }

    // ── Free-capacity ordering ─────────────────────────────────────

    /// Order explicit candidates at `level` by free `resource` capacity.
    ///
    /// Fails with [`CapacityError::MissingRecords`] if any candidate has
    /// no enabled rows, rather than ranking it as empty.
    pub fn order_by_free_capacity(
        &self,
        level: ScopeLevel,
        resource: ResourceType,
        candidates: &[ScopeId],
    ) -> CapacityResult<Ranking> {
        let ledger = self.snapshot(None)?;
        let mut scored = Vec::with_capacity(candidates.len());
        for &id in candidates {
            let scope = ScopeRef { level, id };
            let cap = ledger
                .aggregate(scope, resource, &self.overcommit)
                .ok_or(CapacityError::MissingRecords { scope, resource })?;
            scored.push((id, cap.free()));
        }
        let ranking = Ranking::from_scored(level, scored);
        debug!(%level, %resource, order = ?ranking.order, "ordered candidates by free capacity");
        Ok(ranking)
    }

    /// Order every scope at `level` inside `within` by free `resource` capacity.
    pub fn rank_within(
        &self,
        level: ScopeLevel,
        resource: ResourceType,
        within: Option<ScopeRef>,
    ) -> CapacityResult<Ranking> {
        check_nesting(level, within)?;
        let ledger = self.snapshot(within)?;
        let scored = ledger
            .scope_ids(level, resource)
            .into_iter()
            .filter_map(|id| {
                ledger
                    .aggregate(ScopeRef { level, id }, resource, &self.overcommit)
                    .map(|cap| (id, cap.free()))
            })
            .collect();

        let ranking = Ranking::from_scored(level, scored);
        debug!(%level, %resource, within = ?within, count = ranking.order.len(), "ranked scopes by free capacity");
        Ok(ranking)
    }

    /// Hosts of a zone (optionally narrowed to one cluster) by free capacity.
    pub fn order_hosts_by_free_capacity(
        &self,
        resource: ResourceType,
        zone: ZoneId,
        cluster: Option<ClusterId>,
    ) -> CapacityResult<Ranking> {
        let within = cluster.map(ScopeRef::cluster).unwrap_or(ScopeRef::zone(zone));
        self.rank_within(ScopeLevel::Host, resource, Some(within))
    }

    /// Pods of a zone by aggregate free capacity.
    pub fn order_pods_by_free_capacity(&self, resource: ResourceType, zone: ZoneId) -> CapacityResult<Ranking> {
        self.rank_within(ScopeLevel::Pod, resource, Some(ScopeRef::zone(zone)))
    }

    /// Clusters of a zone or pod by aggregate free capacity.
    pub fn order_clusters_by_free_capacity(
        &self,
        resource: ResourceType,
        within: ScopeRef,
    ) -> CapacityResult<Ranking> {
        self.rank_within(ScopeLevel::Cluster, resource, Some(within))
    }

    // ── VM fit ─────────────────────────────────────────────────────

    /// Clusters or pods whose aggregate free CPU and memory both cover the
    /// request, ordered by free `order_by` capacity.
    ///
    /// A candidate missing CPU or memory rows cannot be judged; it is left
    /// out of this attempt and logged.
    pub fn aggregate_capacity_for_fit(&self, request: &FitRequest) -> CapacityResult<Ranking> {
        if !matches!(request.level, ScopeLevel::Cluster | ScopeLevel::Pod) {
            return Err(CapacityError::InvalidScope(format!(
                "fit candidates must be clusters or pods, not {}",
                request.level
            )));
        }
        if !matches!(request.order_by, ResourceType::Cpu | ResourceType::Memory) {
            return Err(CapacityError::InvalidScope(format!(
                "fit can only be ordered by cpu or memory, not {}",
                request.order_by
            )));
        }
        check_nesting(request.level, Some(request.within))?;

        let ledger = self.snapshot(Some(request.within))?;
        let mut ids = ledger.scope_ids(request.level, ResourceType::Cpu);
        ids.extend(ledger.scope_ids(request.level, ResourceType::Memory));

        let mut scored = Vec::new();
        for id in ids {
            let scope = ScopeRef { level: request.level, id };
            let cpu = ledger.aggregate(scope, ResourceType::Cpu, &self.overcommit);
            let memory = ledger.aggregate(scope, ResourceType::Memory, &self.overcommit);
            let (Some(cpu), Some(memory)) = (cpu, memory) else {
                warn!(%scope, "excluding scope from fit: cpu or memory capacity records missing");
                continue;
            };
            if cpu.free() < request.cpu as f64 || memory.free() < request.memory as f64 {
                debug!(
                    %scope,
                    free_cpu = cpu.free(),
                    free_memory = memory.free(),
                    "scope cannot fit request"
                );
                continue;
            }
            let score = match request.order_by {
                ResourceType::Memory => memory.free(),
                _ => cpu.free(),
            };
            scored.push((id, score));
        }

        let ranking = Ranking::from_scored(request.level, scored);
        debug!(
            within = %request.within,
            cpu = request.cpu,
            memory = request.memory,
            order = ?ranking.order,
            "computed aggregate capacity fit"
        );
        Ok(ranking)
    }

    /// Hosts in `cluster` whose own free CPU and memory both cover the
    /// request, ordered by free CPU.
    pub fn hosts_with_enough_capacity(
        &self,
        cpu: u64,
        memory: u64,
        cluster: ClusterId,
    ) -> CapacityResult<Ranking> {
        let ledger = self.snapshot(Some(ScopeRef::cluster(cluster)))?;
        let scored = self.fitting_hosts(&ledger, cpu, memory);
        Ok(Ranking::from_scored(ScopeLevel::Host, scored))
    }

    /// Clusters inside `within` containing at least one host that fits, ascending id.
    pub fn clusters_with_host_capacity(
        &self,
        cpu: u64,
        memory: u64,
        within: ScopeRef,
    ) -> CapacityResult<Vec<ClusterId>> {
        self.parents_with_host_capacity(ScopeLevel::Cluster, cpu, memory, within)
    }

    /// Pods of `zone` containing at least one host that fits, ascending id.
    pub fn pods_with_host_capacity(&self, cpu: u64, memory: u64, zone: ZoneId) -> CapacityResult<Vec<PodId>> {
        self.parents_with_host_capacity(ScopeLevel::Pod, cpu, memory, ScopeRef::zone(zone))
    }

    fn parents_with_host_capacity(
        &self,
        level: ScopeLevel,
        cpu: u64,
        memory: u64,
        within: ScopeRef,
    ) -> CapacityResult<Vec<ScopeId>> {
        check_nesting(level, Some(within))?;
        let ledger = self.snapshot(Some(within))?;
        let hosts = self.fitting_hosts(&ledger, cpu, memory);

        let mut parents: Vec<ScopeId> = hosts
            .iter()
            .filter_map(|(host, _)| {
                ledger
                    .rows(ScopeRef::host(*host), ResourceType::Cpu)
                    .next()
                    .and_then(|row| row.id_at(level))
            })
            .collect();
        parents.sort_unstable();
        parents.dedup();
        Ok(parents)
    }

    fn fitting_hosts(&self, ledger: &CapacityLedger, cpu: u64, memory: u64) -> Vec<(HostId, f64)> {
        ledger
            .scope_ids(ScopeLevel::Host, ResourceType::Cpu)
            .into_iter()
            .filter_map(|host| {
                let scope = ScopeRef::host(host);
                let free_cpu = ledger.aggregate(scope, ResourceType::Cpu, &self.overcommit)?.free();
                let free_memory = ledger.aggregate(scope, ResourceType::Memory, &self.overcommit)?.free();
                (free_cpu >= cpu as f64 && free_memory >= memory as f64).then_some((host, free_cpu))
            })
            .collect()
    }

    // ── Consumption and thresholds ─────────────────────────────────

    /// Projected consumption `(used + reserved + requested) / allocatable`
    /// of one cluster.
    pub fn find_cluster_consumption(
        &self,
        cluster: ClusterId,
        resource: ResourceType,
        requested: u64,
    ) -> CapacityResult<f64> {
        let scope = ScopeRef::cluster(cluster);
        let ledger = self.snapshot(Some(scope))?;
        let cap = ledger
            .aggregate(scope, resource, &self.overcommit)
            .ok_or(CapacityError::MissingRecords { scope, resource })?;
        Ok(cap.consumption(requested))
    }

    /// Clusters whose projected consumption exceeds their configured trigger.
    pub fn clusters_crossing_threshold(
        &self,
        resource: ResourceType,
        zone: Option<ZoneId>,
        requested: u64,
    ) -> CapacityResult<Vec<ClusterId>> {
        self.crossing(resource, zone, requested, |cluster| {
            self.thresholds.trigger(resource, cluster)
        })
    }

    /// Clusters whose projected consumption exceeds an explicit `trigger`.
    pub fn clusters_crossing_trigger(
        &self,
        resource: ResourceType,
        zone: Option<ZoneId>,
        trigger: f64,
        requested: u64,
    ) -> CapacityResult<Vec<ClusterId>> {
        self.crossing(resource, zone, requested, |_| trigger)
    }

    fn crossing(
        &self,
        resource: ResourceType,
        zone: Option<ZoneId>,
        requested: u64,
        trigger_for: impl Fn(ClusterId) -> f64,
    ) -> CapacityResult<Vec<ClusterId>> {
        let ledger = self.snapshot(zone.map(ScopeRef::zone))?;
        let crossing: Vec<ClusterId> = ledger
            .scope_ids(ScopeLevel::Cluster, resource)
            .into_iter()
            .filter(|&cluster| {
                ledger
                    .aggregate(ScopeRef::cluster(cluster), resource, &self.overcommit)
                    .is_some_and(|cap| cap.consumption(requested) > trigger_for(cluster))
            })
            .collect();

        if !crossing.is_empty() {
            debug!(%resource, requested, clusters = ?crossing, "clusters crossing threshold");
        }
        Ok(crossing)
    }

    // ── Reporting ──────────────────────────────────────────────────

    /// Aggregated capacity of one scope.
    pub fn summed_capacity(&self, resource: ResourceType, scope: ScopeRef) -> CapacityResult<ScopeCapacity> {
        let ledger = self.snapshot(Some(scope))?;
        ledger
            .aggregate(scope, resource, &self.overcommit)
            .ok_or(CapacityError::MissingRecords { scope, resource })
    }

    /// Scopes at `level` ordered by descending used fraction, at most `limit`.
    pub fn top_consumers(
        &self,
        resource: ResourceType,
        level: ScopeLevel,
        within: Option<ScopeRef>,
        limit: usize,
    ) -> CapacityResult<Vec<ScopeCapacity>> {
        check_nesting(level, within)?;
        let ledger = self.snapshot(within)?;
        let mut caps: Vec<ScopeCapacity> = ledger
            .scope_ids(level, resource)
            .into_iter()
            .filter_map(|id| ledger.aggregate(ScopeRef { level, id }, resource, &self.overcommit))
            .collect();
        caps.sort_by(|a, b| {
            b.used_fraction()
                .total_cmp(&a.used_fraction())
                .then(a.scope.id.cmp(&b.scope.id))
        });
        caps.truncate(limit);
        Ok(caps)
    }
}

/// `within` must not be finer than `level` (or absent). An equal level
/// names a single candidate.
fn check_nesting(level: ScopeLevel, within: Option<ScopeRef>) -> CapacityResult<()> {
    match within {
        Some(scope) if scope.level > level => Err(CapacityError::InvalidScope(format!(
            "cannot rank {level}s inside {scope}"
        ))),
        _ => Ok(()),
    }
}
