//! Agent Probe Gateway port.
//!
//! The gateway delivers one command to one host agent and returns its
//! answer. It is transport-agnostic; bounded timeouts are applied by the
//! callers through [`send_with_timeout`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use corral_core::{EpochSecs, HostId};
use corral_state::{HostStatus, StoragePool, Volume};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Commands sent to host agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum AgentCommand {
    /// Report the liveness of `target`. Sent to the target itself or to a neighbor.
    CheckOnHost {
        target: HostId,
        /// Whether the agent should treat a failed storage heartbeat as Down.
        fence_on_storage_heartbeat_failure: bool,
    },
    /// Report whether any of `volumes` shows I/O or lock activity after `suspect_since`.
    CheckVmActivityOnPool {
        suspect: HostId,
        pool: StoragePool,
        volumes: Vec<Volume>,
        suspect_since: EpochSecs,
    },
}

impl AgentCommand {
    pub fn name(&self) -> &'static str {
        match self {
            AgentCommand::CheckOnHost { .. } => "check_on_host",
            AgentCommand::CheckVmActivityOnPool { .. } => "check_vm_activity_on_pool",
        }
    }
}

/// Answers returned by host agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "answer", rename_all = "snake_case")]
pub enum AgentAnswer {
    /// Observed status of the probed target.
    HostStatus { status: HostStatus },
    /// Whether activity was observed after the suspect time.
    PoolActivity { active: bool },
}

/// A single probe that produced no answer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe to host {host} timed out after {after:?}")]
    Timeout { host: HostId, after: Duration },

    #[error("transport to host {host} failed: {reason}")]
    Transport { host: HostId, reason: String },

    /// The agent ran the command and reported a failure.
    #[error("host {host} rejected {command}: {reason}")]
    Rejected {
        host: HostId,
        command: &'static str,
        reason: String,
    },
}

/// Delivers commands to host agents.
pub trait AgentGateway: Send + Sync {
    fn send(
        &self,
        host: HostId,
        command: AgentCommand,
    ) -> impl Future<Output = Result<AgentAnswer, ProbeError>> + Send;
}

impl<T: AgentGateway + ?Sized> AgentGateway for Arc<T> {
    fn send(
        &self,
        host: HostId,
        command: AgentCommand,
    ) -> impl Future<Output = Result<AgentAnswer, ProbeError>> + Send {
        (**self).send(host, command)
    }
}

/// Send `command` to `host`, giving up after `timeout`.
pub async fn send_with_timeout<G: AgentGateway + ?Sized>(
    gateway: &G,
    host: HostId,
    command: AgentCommand,
    timeout: Duration,
) -> Result<AgentAnswer, ProbeError> {
    let name = command.name();
    match tokio::time::timeout(timeout, gateway.send(host, command)).await {
        Ok(result) => result,
        Err(_) => {
            debug!(host_id = host, command = name, ?timeout, "probe timed out");
            Err(ProbeError::Timeout {
                host,
                after: timeout,
            })
        }
    }
}
