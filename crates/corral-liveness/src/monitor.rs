//! Storage activity monitor.
//!
//! Asks a host with access to a pool whether any of a suspect's volumes
//! saw I/O or lock activity after the suspect time. Access hosts are
//! enumerated fresh on every call; if the chosen host does not answer it
//! is excluded and the selector is asked again.

use std::time::Duration;

use corral_core::EpochSecs;
use corral_state::{FleetMembership, Host, StoragePool, Volume};
use tracing::{debug, info, warn};

use crate::access::PoolAccessSelector;
use crate::error::StorageError;
use crate::gateway::{AgentAnswer, AgentCommand, AgentGateway, ProbeError, send_with_timeout};
use crate::investigator::neighbors_of;

pub struct StorageActivityMonitor<G, M, S> {
    gateway: G,
    membership: M,
    selector: S,
    timeout: Duration,
}

impl<G, M, S> StorageActivityMonitor<G, M, S>
where
    G: AgentGateway,
    M: FleetMembership,
    S: PoolAccessSelector,
{
    pub fn new(gateway: G, membership: M, selector: S, timeout: Duration) -> Self {
        Self {
            gateway,
            membership,
            selector,
            timeout,
        }
    }

    /// Whether any of `volumes` on `pool` shows activity after `suspect_since`.
    ///
    /// Fails when no access host answers or the backend reports an error;
    /// neither case is ever read as "no activity".
    pub async fn check_activity(
        &self,
        pool: &StoragePool,
        volumes: &[Volume],
        suspect: &Host,
        suspect_since: EpochSecs,
    ) -> Result<bool, StorageError> {
        let mut candidates = neighbors_of(&self.membership, suspect)?;
        debug!(
            pool_id = pool.id,
            host_id = suspect.id,
            candidates = candidates.len(),
            "checking storage activity"
        );

        while let Some(access) = self.selector.select_access_host(pool, &candidates) {
            if !candidates.iter().any(|h| h.id == access) {
                warn!(pool_id = pool.id, access_host = access, "selector chose a host outside the candidates");
                break;
            }
            let command = AgentCommand::CheckVmActivityOnPool {
                suspect: suspect.id,
                pool: pool.clone(),
                volumes: volumes.to_vec(),
                suspect_since,
            };
            match send_with_timeout(&self.gateway, access, command, self.timeout).await {
                Ok(AgentAnswer::PoolActivity { active }) => {
                    info!(
                        pool_id = pool.id,
                        host_id = suspect.id,
                        access_host = access,
                        active,
                        "storage activity result"
                    );
                    return Ok(active);
                }
                Ok(other) => {
                    warn!(pool_id = pool.id, access_host = access, answer = ?other, "unexpected answer to activity check");
                    return Err(StorageError::InvalidAnswer {
                        pool: pool.id,
                        host: access,
                    });
                }
                Err(ProbeError::Rejected { reason, .. }) => {
                    warn!(pool_id = pool.id, access_host = access, %reason, "storage backend reported an error");
                    return Err(StorageError::Backend {
                        pool: pool.id,
                        reason,
                    });
                }
                Err(e) => {
                    warn!(pool_id = pool.id, access_host = access, error = %e, "access host did not answer, reselecting");
                    candidates.retain(|h| h.id != access);
                }
            }
        }

        warn!(pool_id = pool.id, host_id = suspect.id, "no access host could reach pool");
        Err(StorageError::Unavailable { pool: pool.id })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::access::ScopedPoolAccess;
    use corral_core::HostId;
    use corral_state::{HostStatus, HypervisorFamily, PoolScope, StateStore};

    /// Answers pool checks per access host; hosts without a script time out.
    #[derive(Default)]
    struct PoolAgents {
        answers: HashMap<HostId, Result<AgentAnswer, ProbeError>>,
        asked: Mutex<Vec<HostId>>,
    }

    impl AgentGateway for PoolAgents {
        async fn send(&self, host: HostId, _command: AgentCommand) -> Result<AgentAnswer, ProbeError> {
            self.asked.lock().unwrap().push(host);
            match self.answers.get(&host) {
                Some(answer) => answer.clone(),
                None => std::future::pending().await,
            }
        }
    }

    fn host(id: HostId, status: HostStatus, family: HypervisorFamily) -> Host {
        Host {
            id,
            name: format!("h{id}"),
            family,
            zone_id: 1,
            pod_id: 1,
            cluster_id: 1,
            status,
            last_ping: 0,
        }
    }

    fn store(hosts: &[Host]) -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        for h in hosts {
            store.put_host(h).unwrap();
        }
        store
    }

    fn cluster_pool() -> StoragePool {
        StoragePool {
            id: 10,
            name: "nfs".into(),
            scope: PoolScope::Cluster,
            zone_id: 1,
            cluster_id: Some(1),
            host_id: None,
        }
    }

    fn suspect() -> Host {
        host(1, HostStatus::Disconnected, HypervisorFamily::Kvm)
    }

    fn fleet() -> StateStore {
        store(&[
            suspect(),
            host(2, HostStatus::Up, HypervisorFamily::Kvm),
            host(3, HostStatus::Up, HypervisorFamily::Lxc),
            host(4, HostStatus::Up, HypervisorFamily::XenServer),
            host(5, HostStatus::Down, HypervisorFamily::Kvm),
        ])
    }

    fn monitor(agents: PoolAgents, store: StateStore) -> StorageActivityMonitor<PoolAgents, StateStore, ScopedPoolAccess> {
        StorageActivityMonitor::new(agents, store, ScopedPoolAccess, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn reports_activity_from_access_host() {
        let mut agents = PoolAgents::default();
        agents.answers.insert(2, Ok(AgentAnswer::PoolActivity { active: true }));
        let monitor = monitor(agents, fleet());

        let active = monitor
            .check_activity(&cluster_pool(), &[], &suspect(), 100)
            .await
            .unwrap();
        assert!(active);
    }

    #[tokio::test(start_paused = true)]
    async fn reselects_after_silent_access_host() {
        let mut agents = PoolAgents::default();
        agents.answers.insert(3, Ok(AgentAnswer::PoolActivity { active: false }));
        let monitor = monitor(agents, fleet());

        let active = monitor
            .check_activity(&cluster_pool(), &[], &suspect(), 100)
            .await
            .unwrap();
        assert!(!active);
        // Host 2 timed out, host 3 (LXC, compatible) answered; 4 and 5 never asked.
        assert_eq!(*monitor.gateway.asked.lock().unwrap(), vec![2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_when_nobody_answers() {
        let monitor = monitor(PoolAgents::default(), fleet());
        let err = monitor
            .check_activity(&cluster_pool(), &[], &suspect(), 100)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Unavailable { pool: 10 }));
    }

    #[tokio::test]
    async fn host_local_pool_of_suspect_is_unreachable() {
        let mut agents = PoolAgents::default();
        agents.answers.insert(2, Ok(AgentAnswer::PoolActivity { active: false }));
        let monitor = monitor(agents, fleet());
        let local = StoragePool {
            scope: PoolScope::Host,
            host_id: Some(1),
            ..cluster_pool()
        };

        let err = monitor.check_activity(&local, &[], &suspect(), 100).await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable { .. }));
        assert!(monitor.gateway.asked.lock().unwrap().is_empty());
    }

    /// Always picks the same host, whether or not it was offered.
    struct Fixed(HostId);

    impl PoolAccessSelector for Fixed {
        fn select_access_host(&self, _pool: &StoragePool, _candidates: &[Host]) -> Option<HostId> {
            Some(self.0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn selector_choice_outside_candidates_is_unavailable() {
        let monitor = StorageActivityMonitor::new(
            PoolAgents::default(),
            fleet(),
            Fixed(99),
            Duration::from_secs(30),
        );
        let started = tokio::time::Instant::now();

        let err = monitor
            .check_activity(&cluster_pool(), &[], &suspect(), 100)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Unavailable { pool: 10 }));
        assert!(monitor.gateway.asked.lock().unwrap().is_empty());
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_selected_host_is_asked_once() {
        // Host 2 is a real candidate but never answers; the selector keeps
        // naming it, so it must drop out after one timeout.
        let monitor = StorageActivityMonitor::new(
            PoolAgents::default(),
            fleet(),
            Fixed(2),
            Duration::from_secs(30),
        );

        let err = monitor
            .check_activity(&cluster_pool(), &[], &suspect(), 100)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Unavailable { pool: 10 }));
        assert_eq!(*monitor.gateway.asked.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn backend_error_is_not_retried() {
        let mut agents = PoolAgents::default();
        agents.answers.insert(
            2,
            Err(ProbeError::Rejected {
                host: 2,
                command: "check_vm_activity_on_pool",
                reason: "heartbeat file unreadable".into(),
            }),
        );
        agents.answers.insert(3, Ok(AgentAnswer::PoolActivity { active: false }));
        let monitor = monitor(agents, fleet());

        let err = monitor
            .check_activity(&cluster_pool(), &[], &suspect(), 100)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Backend { pool: 10, .. }));
    }

    #[tokio::test]
    async fn wrong_answer_kind_is_invalid() {
        let mut agents = PoolAgents::default();
        agents.answers.insert(
            2,
            Ok(AgentAnswer::HostStatus {
                status: HostStatus::Up,
            }),
        );
        let monitor = monitor(agents, fleet());

        let err = monitor
            .check_activity(&cluster_pool(), &[], &suspect(), 100)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidAnswer { pool: 10, host: 2 }));
    }
}
