//! Content analysis and schema inference.
//!
//! The analyzer turns a file path into a category plus a shallow feature
//! bag with bounded I/O; the inferrer turns that bag into a proposal for
//! where the file's row should live. Both are pure with respect to the
//! rest of the control plane - no storage, no governance, no agents.

pub mod analyzer;
pub mod inference;

pub use analyzer::{
    Category, CodeFeatures, ContentAnalyzer, DatasetFeatures, DocumentFeatures, Features,
    FileAnalysis, MediaFeatures,
};
pub use inference::{ProposalAction, SchemaInference, SchemaProposal};
