//! End-to-end investigations against an in-memory fleet and a scripted
//! agent gateway.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use corral_core::{EpochSecs, HostId, LivenessSettings, PoolId};
use corral_liveness::{
    AgentAnswer, AgentCommand, AgentGateway, InconclusiveReason, Investigator, LivenessError,
    ProbeError, ScopedPoolAccess, StorageError, Verdict,
};
use corral_state::{Host, HostStatus, HypervisorFamily, PoolScope, StateStore, StoragePool, Volume};

const T0: EpochSecs = 1_700_000_000;

/// What a host agent does when asked something.
#[derive(Clone)]
enum Reply {
    Status(HostStatus),
    /// Activity on a pool: the timestamp of the last I/O, if any.
    LastIo(Option<EpochSecs>),
    /// Last I/O per pool; pools not listed make the backend fail.
    PerPool(HashMap<PoolId, Option<EpochSecs>>),
    Fail,
    Hang,
}

/// Scripted gateway: liveness replies per queried host, activity replies
/// per access host. Unscripted hosts hang until the probe times out.
#[derive(Default)]
struct ScriptedAgents {
    liveness: HashMap<HostId, Reply>,
    activity: HashMap<HostId, Reply>,
    sent: Mutex<Vec<(HostId, AgentCommand)>>,
}

impl ScriptedAgents {
    fn liveness(mut self, host: HostId, reply: Reply) -> Self {
        self.liveness.insert(host, reply);
        self
    }

    fn activity(mut self, host: HostId, reply: Reply) -> Self {
        self.activity.insert(host, reply);
        self
    }

    fn sent_to(&self) -> Vec<HostId> {
        self.sent.lock().unwrap().iter().map(|(h, _)| *h).collect()
    }

    fn activity_checks(&self) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c)| matches!(c, AgentCommand::CheckVmActivityOnPool { .. }))
            .count()
    }
}

impl AgentGateway for ScriptedAgents {
    async fn send(&self, host: HostId, command: AgentCommand) -> Result<AgentAnswer, ProbeError> {
        self.sent.lock().unwrap().push((host, command.clone()));
        let reply = match &command {
            AgentCommand::CheckOnHost { .. } => self.liveness.get(&host),
            AgentCommand::CheckVmActivityOnPool { .. } => self.activity.get(&host),
        }
        .cloned()
        .unwrap_or(Reply::Hang);

        match (reply, command) {
            (Reply::Status(status), _) => Ok(AgentAnswer::HostStatus { status }),
            (Reply::LastIo(last), AgentCommand::CheckVmActivityOnPool { suspect_since, .. }) => {
                Ok(AgentAnswer::PoolActivity {
                    active: last.is_some_and(|t| t > suspect_since),
                })
            }
            (
                Reply::PerPool(pools),
                AgentCommand::CheckVmActivityOnPool {
                    pool, suspect_since, ..
                },
            ) => match pools.get(&pool.id) {
                Some(last) => Ok(AgentAnswer::PoolActivity {
                    active: last.is_some_and(|t| t > suspect_since),
                }),
                None => Err(ProbeError::Rejected {
                    host,
                    command: "check_vm_activity_on_pool",
                    reason: format!("cannot read heartbeat on pool {}", pool.id),
                }),
            },
            (Reply::LastIo(_) | Reply::PerPool(_), _) => Err(ProbeError::Transport {
                host,
                reason: "unexpected command".into(),
            }),
            (Reply::Fail, _) => Err(ProbeError::Transport {
                host,
                reason: "connection refused".into(),
            }),
            (Reply::Hang, _) => std::future::pending().await,
        }
    }
}

fn host(id: HostId, family: HypervisorFamily, status: HostStatus) -> Host {
    Host {
        id,
        name: format!("hv-{id:02}"),
        family,
        zone_id: 1,
        pod_id: 1,
        cluster_id: 1,
        status,
        last_ping: T0,
    }
}

fn pool(id: PoolId) -> StoragePool {
    StoragePool {
        id,
        name: format!("nfs-{id}"),
        scope: PoolScope::Cluster,
        zone_id: 1,
        cluster_id: Some(1),
        host_id: None,
    }
}

fn volume(id: u64, pool_id: PoolId, host_id: HostId) -> Volume {
    Volume {
        id,
        name: format!("ROOT-{id}"),
        pool_id,
        host_id,
        vm_id: 100 + id,
        path: format!("/mnt/{pool_id}/{id}"),
    }
}

/// H (id 1) is the suspect; N1 (id 2) and N2 (id 3) are KVM neighbors.
fn fleet(volumes: &[Volume]) -> Arc<StateStore> {
    let store = StateStore::open_in_memory().unwrap();
    store.put_host(&host(1, HypervisorFamily::Kvm, HostStatus::Disconnected)).unwrap();
    store.put_host(&host(2, HypervisorFamily::Kvm, HostStatus::Up)).unwrap();
    store.put_host(&host(3, HypervisorFamily::Kvm, HostStatus::Up)).unwrap();
    store.put_pool(&pool(10)).unwrap();
    store.put_pool(&pool(20)).unwrap();
    for v in volumes {
        store.put_volume(v).unwrap();
    }
    Arc::new(store)
}

type TestInvestigator = Investigator<Arc<ScriptedAgents>, Arc<StateStore>, Arc<StateStore>, ScopedPoolAccess>;

fn build(agents: ScriptedAgents, store: Arc<StateStore>) -> (TestInvestigator, Arc<ScriptedAgents>) {
    let agents = Arc::new(agents);
    let settings = LivenessSettings {
        probe_timeout: Duration::from_secs(10),
        activity_check_timeout: Duration::from_secs(30),
        fence_on_storage_heartbeat_failure: true,
    };
    let investigator = Investigator::new(agents.clone(), store.clone(), store, ScopedPoolAccess, settings);
    (investigator, agents)
}

fn suspect() -> Host {
    host(1, HypervisorFamily::Kvm, HostStatus::Disconnected)
}

#[tokio::test(start_paused = true)]
async fn healthy_direct_probe_short_circuits() {
    let agents = ScriptedAgents::default()
        .liveness(1, Reply::Status(HostStatus::Up))
        .liveness(2, Reply::Status(HostStatus::Down))
        .activity(2, Reply::LastIo(Some(T0 + 60)));
    let (investigator, agents) = build(agents, fleet(&[volume(1, 10, 1)]));

    assert_eq!(investigator.investigate(&suspect(), T0).await.unwrap(), Verdict::Up);
    assert_eq!(agents.sent_to(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn direct_timeout_and_neighbor_down_with_idle_storage_is_down() {
    let agents = ScriptedAgents::default()
        .liveness(2, Reply::Status(HostStatus::Down))
        .liveness(3, Reply::Fail)
        .activity(2, Reply::LastIo(Some(T0 - 30)));
    let (investigator, agents) = build(agents, fleet(&[volume(1, 10, 1)]));

    assert_eq!(investigator.investigate(&suspect(), T0).await.unwrap(), Verdict::Down);
    assert_eq!(agents.activity_checks(), 1);
}

#[tokio::test(start_paused = true)]
async fn io_after_suspect_time_is_inconclusive() {
    let agents = ScriptedAgents::default()
        .liveness(2, Reply::Status(HostStatus::Down))
        .activity(2, Reply::LastIo(Some(T0 + 5)));
    let (investigator, _) = build(agents, fleet(&[volume(1, 10, 1)]));

    let err = investigator.investigate(&suspect(), T0).await.unwrap_err();
    assert!(err.is_retryable());
    match err {
        LivenessError::Inconclusive {
            host,
            reason: InconclusiveReason::StorageActivity { pools },
        } => {
            assert_eq!(host, 1);
            assert_eq!(pools, vec![10]);
        }
        other => panic!("expected storage activity, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn first_neighbor_up_wins() {
    let agents = ScriptedAgents::default()
        .liveness(1, Reply::Status(HostStatus::Down))
        .liveness(2, Reply::Status(HostStatus::Up))
        .liveness(3, Reply::Status(HostStatus::Down))
        .activity(2, Reply::LastIo(None));
    let (investigator, agents) = build(agents, fleet(&[volume(1, 10, 1)]));

    assert_eq!(
        investigator.investigate(&suspect(), T0).await.unwrap(),
        Verdict::Disconnected
    );
    let liveness_targets: Vec<HostId> = agents
        .sent
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, c)| matches!(c, AgentCommand::CheckOnHost { .. }))
        .map(|(h, _)| *h)
        .collect();
    assert_eq!(liveness_targets, vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn neighbor_up_never_yields_down() {
    for direct in [Reply::Status(HostStatus::Down), Reply::Hang, Reply::Fail] {
        for other in [Reply::Status(HostStatus::Down), Reply::Hang] {
            let agents = ScriptedAgents::default()
                .liveness(1, direct.clone())
                .liveness(2, other.clone())
                .liveness(3, Reply::Status(HostStatus::Up))
                .activity(2, Reply::LastIo(None));
            let (investigator, _) = build(agents, fleet(&[]));
            let verdict = investigator.investigate(&suspect(), T0).await.unwrap();
            assert_ne!(verdict, Verdict::Down);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn no_volumes_returns_pre_storage_verdict() {
    let agents = ScriptedAgents::default().liveness(1, Reply::Status(HostStatus::Down));
    let (investigator, agents) = build(agents, fleet(&[]));

    assert_eq!(investigator.investigate(&suspect(), T0).await.unwrap(), Verdict::Down);
    assert_eq!(agents.activity_checks(), 0);
}

#[tokio::test(start_paused = true)]
async fn nobody_answers_and_storage_unreachable_is_inconclusive() {
    let (investigator, _) = build(ScriptedAgents::default(), fleet(&[volume(1, 10, 1)]));

    let err = investigator.investigate(&suspect(), T0).await.unwrap_err();
    assert!(matches!(
        err,
        LivenessError::Inconclusive {
            reason: InconclusiveReason::Storage(StorageError::Unavailable { pool: 10 }),
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn every_pool_is_checked_and_activity_wins() {
    // Pool 10 errors on the backend, pool 20 shows fresh I/O.
    let pools = HashMap::from([(20, Some(T0 + 1))]);
    let agents = ScriptedAgents::default()
        .liveness(1, Reply::Status(HostStatus::Down))
        .activity(2, Reply::PerPool(pools));
    let (investigator, agents) = build(agents, fleet(&[volume(1, 10, 1), volume(2, 20, 1)]));

    let err = investigator.investigate(&suspect(), T0).await.unwrap_err();
    match err {
        LivenessError::Inconclusive {
            reason: InconclusiveReason::StorageActivity { pools },
            ..
        } => assert_eq!(pools, vec![20]),
        other => panic!("expected storage activity, got {other:?}"),
    }
    assert_eq!(agents.activity_checks(), 2);
}

#[tokio::test(start_paused = true)]
async fn storage_backend_error_is_inconclusive() {
    let pools = HashMap::from([(20, None)]);
    let agents = ScriptedAgents::default()
        .liveness(1, Reply::Status(HostStatus::Down))
        .activity(2, Reply::PerPool(pools));
    let (investigator, _) = build(agents, fleet(&[volume(1, 10, 1), volume(2, 20, 1)]));

    let err = investigator.investigate(&suspect(), T0).await.unwrap_err();
    assert!(matches!(
        err,
        LivenessError::Inconclusive {
            reason: InconclusiveReason::Storage(StorageError::Backend { pool: 10, .. }),
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn all_pools_idle_keeps_verdict() {
    let agents = ScriptedAgents::default()
        .liveness(2, Reply::Status(HostStatus::Up))
        .activity(2, Reply::LastIo(Some(T0)));
    let (investigator, agents) = build(agents, fleet(&[volume(1, 10, 1), volume(2, 20, 1)]));

    assert_eq!(
        investigator.investigate(&suspect(), T0).await.unwrap(),
        Verdict::Disconnected
    );
    assert_eq!(agents.activity_checks(), 2);
}

#[tokio::test(start_paused = true)]
async fn check_on_host_carries_fence_flag() {
    let agents = ScriptedAgents::default().liveness(1, Reply::Status(HostStatus::Up));
    let (investigator, agents) = build(agents, fleet(&[]));
    investigator.investigate(&suspect(), T0).await.unwrap();

    let sent = agents.sent.lock().unwrap();
    assert!(matches!(
        sent[0].1,
        AgentCommand::CheckOnHost {
            target: 1,
            fence_on_storage_heartbeat_failure: true
        }
    ));
}

#[tokio::test]
async fn unsupported_family_fails_without_probing() {
    let (investigator, agents) = build(ScriptedAgents::default(), fleet(&[]));
    let xen = host(9, HypervisorFamily::XenServer, HostStatus::Disconnected);

    let err = investigator.investigate(&xen, T0).await.unwrap_err();
    assert!(matches!(
        err,
        LivenessError::UnsupportedHost {
            host: 9,
            family: HypervisorFamily::XenServer
        }
    ));
    assert!(!err.is_retryable());
    assert!(agents.sent_to().is_empty());
}

#[tokio::test(start_paused = true)]
async fn is_healthy_falls_back_to_neighbors() {
    let agents = ScriptedAgents::default().liveness(3, Reply::Status(HostStatus::Up));
    let (investigator, agents) = build(agents, fleet(&[volume(1, 10, 1)]));

    assert!(investigator.is_healthy(&suspect()).await.unwrap());
    assert_eq!(agents.activity_checks(), 0);

    let agents = ScriptedAgents::default().liveness(1, Reply::Status(HostStatus::Down));
    let (investigator, _) = build(agents, fleet(&[]));
    assert!(!investigator.is_healthy(&suspect()).await.unwrap());
}
