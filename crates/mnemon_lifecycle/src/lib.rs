//! The agent lifecycle manager.
//!
//! Owns the active-agent map, the revoked-id tombstone set, a FIFO job
//! queue, the completed-jobs map, and the background monitor. Reuse is a
//! claim: the scan finds an idle agent of the right kind and flips it
//! idle -> busy with a compare-exchange, so two submitters can never end
//! up holding the same agent.
//!
//! Failure semantics:
//! - job failures are returned, never retried here
//! - a failed job whose agent sits below the trust floor revokes it
//! - revocation is permanent for the life of the process
//! - the monitor loop isolates its own errors and backs off

pub mod manager;
pub mod policy;

pub use manager::{JobRecord, LifecycleManager, LifecycleMetrics};
pub use policy::LifecyclePolicy;

use mnemon_protocol::AgentId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Agent not found: {0}")]
    AgentNotFound(AgentId),

    #[error("Unknown job id: {0}")]
    UnknownJob(String),
}
