//! Canonical types for the mnemon control plane.
//!
//! Every crate in the workspace speaks these types. Subsystem crates add
//! their own domain structs, but agent kinds, job shapes, risk tiers and
//! severities are defined exactly once, here.

pub mod event;
pub mod ids;
pub mod shutdown;
pub mod types;

pub use event::{Event, EventBus, EventReceiver, EventSink};
pub use ids::{AgentId, CorrelationId, JobId, ProposalId};
pub use shutdown::ShutdownToken;
pub use types::{
    AgentKind, AgentSnapshot, AgentState, AlertSeverity, ContradictionSeverity, JobOutcome,
    JobSpec, JobState, RiskLevel,
};
