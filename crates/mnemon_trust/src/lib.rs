//! Trust scoring and contradiction detection.
//!
//! Trust is a weighted sum of five structural signals per row;
//! contradictions are cross-row findings produced by declarative rule
//! packs. The two interact - the consistency factor of trust reads the
//! contradiction set - and the cycle is broken by always scoring against
//! the **previous** contradiction snapshot: the detector never calls the
//! trust engine.

pub mod contradiction;
pub mod scoring;

pub use contradiction::{
    ContradictionDetector, ContradictionRecord, ContradictionSnapshot, ContradictionSummary,
    RuleMethod, RulePack, TableRule,
};
pub use scoring::{TrustEngine, TrustReport, TrustTableStats, HIGH_TRUST_THRESHOLD, LOW_TRUST_THRESHOLD};

use std::sync::RwLock;

/// Shared holder for the most recent completed contradiction pass.
///
/// Trust scoring always reads from here; detection passes write here
/// when they finish. That one-way flow is what breaks the
/// trust-consistency cycle.
#[derive(Default)]
pub struct SnapshotCell {
    inner: RwLock<ContradictionSnapshot>,
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> ContradictionSnapshot {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set(&self, snapshot: ContradictionSnapshot) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = snapshot;
    }
}
