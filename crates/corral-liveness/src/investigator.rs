//! Host liveness investigator.
//!
//! Reconciles the direct probe with neighbor reports:
//!
//! | direct       | neighbor Up  | neighbor Down | no neighbor answer |
//! |--------------|--------------|---------------|--------------------|
//! | Down         | Disconnected | Down          | Down               |
//! | Disconnected | Disconnected | Down          | Disconnected       |
//!
//! A Down or Disconnected result is then checked against storage: any pool
//! holding the suspect's volumes that shows activity after the suspect
//! time makes the investigation inconclusive.

use std::fmt;

use corral_core::{EpochSecs, LivenessSettings};
use corral_state::{FleetMembership, Host, HostStatus, StateResult, VolumeCatalog, is_up};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::access::{PoolAccessSelector, group_volumes_by_pool};
use crate::error::{InconclusiveReason, LivenessError, LivenessResult, StorageError};
use crate::gateway::{AgentAnswer, AgentCommand, AgentGateway, send_with_timeout};
use crate::monitor::StorageActivityMonitor;

/// Liveness conclusion for a suspect host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Up,
    Down,
    Disconnected,
}

impl From<Verdict> for HostStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Up => HostStatus::Up,
            Verdict::Down => HostStatus::Down,
            Verdict::Disconnected => HostStatus::Disconnected,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&HostStatus::from(*self), f)
    }
}

/// Outcome of the direct probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direct {
    Healthy,
    Unhealthy,
    Unreachable,
}

/// Up hosts in the suspect's cluster with a compatible family, suspect excluded.
pub(crate) fn neighbors_of<M: FleetMembership + ?Sized>(
    membership: &M,
    suspect: &Host,
) -> StateResult<Vec<Host>> {
    Ok(membership
        .up_hosts_in_cluster(suspect.cluster_id)?
        .into_iter()
        .filter(|h| h.id != suspect.id && is_up(h) && suspect.family.is_compatible_with(h.family))
        .collect())
}

/// Final pre-storage verdict from the direct probe and the neighbor status.
fn reconcile(direct: Direct, neighbor: Option<HostStatus>) -> Verdict {
    match (direct, neighbor) {
        (Direct::Healthy, _) => Verdict::Up,
        (_, Some(HostStatus::Up)) => Verdict::Disconnected,
        (_, Some(HostStatus::Down)) => Verdict::Down,
        (Direct::Unhealthy, _) => Verdict::Down,
        (Direct::Unreachable, _) => Verdict::Disconnected,
    }
}

pub struct Investigator<G, M, V, S> {
    gateway: G,
    membership: M,
    catalog: V,
    monitor: StorageActivityMonitor<G, M, S>,
    settings: LivenessSettings,
}

impl<G, M, V, S> Investigator<G, M, V, S>
where
    G: AgentGateway + Clone,
    M: FleetMembership + Clone,
    V: VolumeCatalog,
    S: PoolAccessSelector,
{
    pub fn new(gateway: G, membership: M, catalog: V, selector: S, settings: LivenessSettings) -> Self {
        let monitor = StorageActivityMonitor::new(
            gateway.clone(),
            membership.clone(),
            selector,
            settings.activity_check_timeout,
        );
        Self {
            gateway,
            membership,
            catalog,
            monitor,
            settings,
        }
    }

    /// Decide whether `suspect` is Up, Down or Disconnected.
    ///
    /// Fails `Inconclusive` when storage shows activity after
    /// `suspect_since`, when storage cannot be checked, or when fleet
    /// state cannot be read. The caller must not fence on failure.
    pub async fn investigate(&self, suspect: &Host, suspect_since: EpochSecs) -> LivenessResult<Verdict> {
        ensure_supported(suspect)?;
        info!(host_id = suspect.id, host = %suspect.name, suspect_since, "investigating host");

        let direct = self.probe_direct(suspect).await;
        if direct == Direct::Healthy {
            info!(host_id = suspect.id, "host answered healthy, verdict Up");
            return Ok(Verdict::Up);
        }

        let neighbors = neighbors_of(&self.membership, suspect)
            .map_err(|e| self.lookup_failed(suspect, e))?;
        let neighbor_status = self.poll_neighbors(suspect, &neighbors).await;
        let verdict = reconcile(direct, neighbor_status);
        info!(
            host_id = suspect.id,
            direct = ?direct,
            neighbor_status = ?neighbor_status,
            %verdict,
            "reconciled liveness evidence"
        );

        self.check_storage(suspect, suspect_since).await?;
        info!(host_id = suspect.id, %verdict, "no storage activity, verdict stands");
        Ok(verdict)
    }

    /// Dashboard health check: direct probe, then neighbors if the host
    /// does not answer. Never checks storage.
    pub async fn is_healthy(&self, host: &Host) -> LivenessResult<bool> {
        ensure_supported(host)?;
        match self.probe_direct(host).await {
            Direct::Healthy => Ok(true),
            Direct::Unhealthy => Ok(false),
            Direct::Unreachable => {
                let neighbors = neighbors_of(&self.membership, host)
                    .map_err(|e| self.lookup_failed(host, e))?;
                let status = self.poll_neighbors(host, &neighbors).await;
                Ok(status == Some(HostStatus::Up))
            }
        }
    }

    fn check_on(&self, target: &Host) -> AgentCommand {
        AgentCommand::CheckOnHost {
            target: target.id,
            fence_on_storage_heartbeat_failure: self.settings.fence_on_storage_heartbeat_failure,
        }
    }

    async fn probe_direct(&self, suspect: &Host) -> Direct {
        let answer = send_with_timeout(
            &self.gateway,
            suspect.id,
            self.check_on(suspect),
            self.settings.probe_timeout,
        )
        .await;

        let direct = match answer {
            Ok(AgentAnswer::HostStatus {
                status: HostStatus::Up,
            }) => Direct::Healthy,
            Ok(AgentAnswer::HostStatus {
                status: HostStatus::Down | HostStatus::Disconnected,
            }) => Direct::Unhealthy,
            Ok(AgentAnswer::HostStatus {
                status: HostStatus::Unknown,
            }) => Direct::Unreachable,
            Ok(other) => {
                warn!(host_id = suspect.id, answer = ?other, "unexpected answer to direct probe");
                Direct::Unreachable
            }
            Err(e) => {
                debug!(host_id = suspect.id, error = %e, "direct probe failed");
                Direct::Unreachable
            }
        };
        debug!(host_id = suspect.id, result = ?direct, "direct probe");
        direct
    }

    /// Ask each neighbor about `suspect` in turn. The first Up report wins;
    /// otherwise the last status any neighbor reported is kept.
    async fn poll_neighbors(&self, suspect: &Host, neighbors: &[Host]) -> Option<HostStatus> {
        let mut reported = None;
        for neighbor in neighbors {
            let answer = send_with_timeout(
                &self.gateway,
                neighbor.id,
                self.check_on(suspect),
                self.settings.probe_timeout,
            )
            .await;
            match answer {
                Ok(AgentAnswer::HostStatus { status }) => {
                    debug!(host_id = suspect.id, neighbor = neighbor.id, %status, "neighbor report");
                    reported = Some(status);
                    if status == HostStatus::Up {
                        break;
                    }
                }
                Ok(other) => {
                    warn!(host_id = suspect.id, neighbor = neighbor.id, answer = ?other, "unexpected neighbor answer");
                }
                Err(e) => {
                    debug!(host_id = suspect.id, neighbor = neighbor.id, error = %e, "neighbor gave no evidence");
                }
            }
        }
        reported
    }

    /// Check every pool holding the suspect's volumes. All checks finish
    /// before deciding; activity anywhere outranks storage failures.
    async fn check_storage(&self, suspect: &Host, suspect_since: EpochSecs) -> LivenessResult<()> {
        let volumes = self
            .catalog
            .volumes_on_host(suspect.id)
            .map_err(|e| self.lookup_failed(suspect, e))?;
        if volumes.is_empty() {
            debug!(host_id = suspect.id, "no volumes, skipping storage check");
            return Ok(());
        }

        let mut active = Vec::new();
        let mut failure: Option<StorageError> = None;
        for (pool_id, pool_volumes) in group_volumes_by_pool(&volumes) {
            let Some(first) = pool_volumes.first() else {
                continue;
            };
            let pool = self
                .catalog
                .pool_of_volume(first.id)
                .map_err(|e| self.lookup_failed(suspect, e))?;
            match self
                .monitor
                .check_activity(&pool, &pool_volumes, suspect, suspect_since)
                .await
            {
                Ok(true) => active.push(pool_id),
                Ok(false) => {}
                Err(e) => {
                    warn!(host_id = suspect.id, pool_id, error = %e, "storage activity check failed");
                    failure.get_or_insert(e);
                }
            }
        }

        if !active.is_empty() {
            warn!(host_id = suspect.id, pools = ?active, "storage activity after suspect time, investigation inconclusive");
            return Err(LivenessError::inconclusive(
                suspect.id,
                InconclusiveReason::StorageActivity { pools: active },
            ));
        }
        if let Some(e) = failure {
            warn!(host_id = suspect.id, error = %e, "storage unverifiable, investigation inconclusive");
            return Err(LivenessError::inconclusive(suspect.id, e));
        }
        Ok(())
    }

    fn lookup_failed(&self, host: &Host, error: corral_state::StateError) -> LivenessError {
        warn!(host_id = host.id, error = %error, "fleet lookup failed, investigation inconclusive");
        LivenessError::inconclusive(host.id, error)
    }
}

fn ensure_supported(host: &Host) -> LivenessResult<()> {
    if host.family.probe_group().is_none() {
        warn!(host_id = host.id, family = %host.family, "no liveness probe for hypervisor family");
        return Err(LivenessError::UnsupportedHost {
            host: host.id,
            family: host.family,
        });
    }
    Ok(())
}
