//! Governance gateway seam.
//!
//! Every mutation of the memory store travels through here as an update
//! submission. The gateway itself is an external collaborator and is
//! treated as potentially unavailable: replies may be a rich object or a
//! bare correlation string, and a dead gateway must degrade to "pending",
//! never to a crash or a silent approval.
//!
//! # Modules
//!
//! - [`gateway`]: the `Gateway` trait, reply normalization, timeout wrapper
//! - [`policy`]: a local gateway implementing the risk-tier policy
//! - [`proposal`]: schema-proposal records and the pending-proposal log

pub mod gateway;
pub mod policy;
pub mod proposal;

pub use gateway::{Decision, Gateway, GatewayError, GatewayReply, GovernanceClient, UpdateSubmission};
pub use policy::PolicyGateway;
pub use proposal::{ProposalKind, ProposalLog, ProposalRecord, ProposalState};

/// Well-known update kinds routed through the gateway.
pub mod update_kinds {
    pub const ROW_INSERT: &str = "memory_table_row_insert";
    pub const SCHEMA_CREATE: &str = "memory_table_schema_create";
    pub const SCHEMA_MODIFY: &str = "memory_table_schema_modify";
    pub const AGENT_REGISTRATION: &str = "agent_registration";
    pub const AGENT_DEREGISTRATION: &str = "agent_deregistration";
    pub const AGENT_REVOCATION: &str = "agent_revocation";
    pub const TRAINING_COMPLETED: &str = "auto_training_completed";
}
