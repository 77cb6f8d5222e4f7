use corral_core::{HostId, PoolId};
use corral_state::{HypervisorFamily, StateError};
use thiserror::Error;

/// Failures of a liveness investigation.
#[derive(Debug, Error)]
pub enum LivenessError {
    /// No trustworthy verdict; the caller must retry later and must not fence.
    #[error("investigation of host {host} inconclusive: {reason}")]
    Inconclusive {
        host: HostId,
        reason: InconclusiveReason,
    },

    #[error("host {host} runs {family}, which has no liveness probe")]
    UnsupportedHost {
        host: HostId,
        family: HypervisorFamily,
    },
}

/// Why an investigation could not conclude.
#[derive(Debug, Error)]
pub enum InconclusiveReason {
    /// At least one pool showed I/O or lock activity after the suspect time.
    #[error("storage activity observed on pools {pools:?}")]
    StorageActivity { pools: Vec<PoolId> },

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Fleet state needed for the investigation could not be read.
    #[error("lookup failed: {0}")]
    Lookup(#[from] StateError),
}

/// Failures of a single storage activity check.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no access host could reach pool {pool}")]
    Unavailable { pool: PoolId },

    #[error("storage backend error on pool {pool}: {reason}")]
    Backend { pool: PoolId, reason: String },

    #[error("invalid activity answer for pool {pool} from host {host}")]
    InvalidAnswer { pool: PoolId, host: HostId },

    #[error("membership lookup failed: {0}")]
    Membership(#[from] StateError),
}

pub type LivenessResult<T> = Result<T, LivenessError>;

impl LivenessError {
    pub(crate) fn inconclusive(host: HostId, reason: impl Into<InconclusiveReason>) -> Self {
        LivenessError::Inconclusive {
            host,
            reason: reason.into(),
        }
    }

    /// Whether the caller should reschedule the check.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LivenessError::Inconclusive { .. })
    }
}
