//! The auto-ingestion pipeline.
//!
//! Two cooperating roles drive files from watched folders into the
//! memory store:
//!
//! - **Staging** (periodic scan): enumerate watched folders, skip what
//!   should be skipped, analyze, infer a proposal, and draft. Confident
//!   drafts hand off to approval; the rest are retained.
//! - **Approval** (periodic drain): submit each draft to governance at a
//!   risk derived from its confidence, and on approval run an ingestion
//!   agent through the lifecycle manager, score the row, notify the
//!   training trigger and publish `row_inserted`.
//!
//! Per-file state machine: `unseen -> analyzed -> drafted -> proposed ->
//! {approved -> inserted -> scored, rejected, pending}`. Analysis errors
//! are retried on the next scan; insert errors are recorded in
//! `memory_insights` and the source marked processed so the loop cannot
//! wedge; a dead gateway auto-approves only `use_existing` actions.

pub mod pipeline;

pub use pipeline::{Draft, IngestConfig, IngestStats, IngestionPipeline};
