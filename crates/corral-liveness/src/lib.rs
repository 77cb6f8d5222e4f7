//! corral-liveness — decides whether an unresponsive host is really dead.
//!
//! An investigation combines three independent sources of evidence:
//!
//! 1. a direct liveness probe to the suspect's agent,
//! 2. the same probe relayed through Up neighbors in the suspect's cluster,
//! 3. a storage activity cross-check on every pool holding the suspect's
//!    volumes, issued through hosts that can reach those pools.
//!
//! [`Investigator`] returns a [`Verdict`] or fails with
//! [`LivenessError::Inconclusive`]; it never persists host status and never
//! falls back to `Down` when evidence is missing.
//!
//! Transports, membership and pool access are ports ([`AgentGateway`],
//! [`PoolAccessSelector`] and the `corral-state` read traits) passed in at
//! construction time.

pub mod access;
pub mod error;
pub mod gateway;
pub mod investigator;
pub mod monitor;

pub use access::{PoolAccessSelector, ScopedPoolAccess, group_volumes_by_pool};
pub use error::{InconclusiveReason, LivenessError, LivenessResult, StorageError};
pub use gateway::{AgentAnswer, AgentCommand, AgentGateway, ProbeError};
pub use investigator::{Investigator, Verdict};
pub use monitor::StorageActivityMonitor;
