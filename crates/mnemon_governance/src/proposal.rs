//! Schema-proposal records and the pending-proposal log.
//!
//! A proposal is created by the ingestion pipeline, routed through the
//! gateway, and is terminal once decided. The log keeps pending entries
//! keyed by proposal id so held work can be approved or rejected later.

use chrono::{DateTime, Utc};
use mnemon_protocol::{CorrelationId, ProposalId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// What kind of mutation the proposal asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    InsertRow,
    ExtendTable,
    CreateTable,
}

impl ProposalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalKind::InsertRow => "insert_row",
            ProposalKind::ExtendTable => "extend_table",
            ProposalKind::CreateTable => "create_table",
        }
    }
}

impl fmt::Display for ProposalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Proposal lifecycle. Terminal once decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalState {
    Pending,
    Approved,
    Rejected,
    AutoApproved,
}

impl ProposalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalState::Pending => "pending",
            ProposalState::Approved => "approved",
            ProposalState::Rejected => "rejected",
            ProposalState::AutoApproved => "auto_approved",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProposalState::Pending)
    }
}

impl fmt::Display for ProposalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One schema proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub id: ProposalId,
    pub kind: ProposalKind,
    pub target_table: String,
    pub payload: serde_json::Value,
    pub confidence: f64,
    pub reasoning: String,
    /// What produced this proposal (usually a file path).
    pub source_ref: Option<String>,
    pub state: ProposalState,
    /// Correlation id issued by the gateway for this proposal.
    pub update_id: Option<CorrelationId>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl ProposalRecord {
    pub fn new(
        kind: ProposalKind,
        target_table: impl Into<String>,
        payload: serde_json::Value,
        confidence: f64,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            id: ProposalId::new(),
            kind,
            target_table: target_table.into(),
            payload,
            confidence,
            reasoning: reasoning.into(),
            source_ref: None,
            state: ProposalState::Pending,
            update_id: None,
            created_at: Utc::now(),
            decided_at: None,
        }
    }

    pub fn with_source_ref(mut self, source_ref: impl Into<String>) -> Self {
        self.source_ref = Some(source_ref.into());
        self
    }

    pub fn decide(&mut self, state: ProposalState) {
        self.state = state;
        self.decided_at = Some(Utc::now());
    }
}

/// In-memory log of pending proposals, keyed by proposal id.
#[derive(Default)]
pub struct ProposalLog {
    pending: Mutex<HashMap<ProposalId, ProposalRecord>>,
}

impl ProposalLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, record: ProposalRecord) {
        let mut guard = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(record.id, record);
    }

    pub fn get(&self, id: &ProposalId) -> Option<ProposalRecord> {
        let guard = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        guard.get(id).cloned()
    }

    /// Remove and return a pending proposal (taking it for decision).
    pub fn take(&self, id: &ProposalId) -> Option<ProposalRecord> {
        let mut guard = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(id)
    }

    pub fn list(&self) -> Vec<ProposalRecord> {
        let guard = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<ProposalRecord> = guard.values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    pub fn len(&self) -> usize {
        let guard = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop pending proposals older than `max_age`, returning the count.
    pub fn discard_stale(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut guard = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let before = guard.len();
        guard.retain(|_, record| record.created_at >= cutoff);
        before - guard.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ProposalRecord {
        ProposalRecord::new(
            ProposalKind::InsertRow,
            "memory_documents",
            serde_json::json!({"title": "x"}),
            0.8,
            "matches document pattern",
        )
        .with_source_ref("/watched/doc.txt")
    }

    #[test]
    fn decide_is_terminal() {
        let mut proposal = record();
        assert!(!proposal.state.is_terminal());
        proposal.decide(ProposalState::Approved);
        assert!(proposal.state.is_terminal());
        assert!(proposal.decided_at.is_some());
    }

    #[test]
    fn log_put_take_round_trip() {
        let log = ProposalLog::new();
        let proposal = record();
        let id = proposal.id;
        log.put(proposal);

        assert_eq!(log.len(), 1);
        let taken = log.take(&id).unwrap();
        assert_eq!(taken.id, id);
        assert!(log.take(&id).is_none());
        assert!(log.is_empty());
    }

    #[test]
    fn discard_stale_drops_old_entries() {
        let log = ProposalLog::new();
        let mut old = record();
        old.created_at = Utc::now() - chrono::Duration::hours(48);
        log.put(old);
        log.put(record());

        let dropped = log.discard_stale(chrono::Duration::hours(24));
        assert_eq!(dropped, 1);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn list_is_sorted_by_creation() {
        let log = ProposalLog::new();
        let mut first = record();
        first.created_at = Utc::now() - chrono::Duration::minutes(5);
        let first_id = first.id;
        log.put(record());
        log.put(first);

        let listed = log.list();
        assert_eq!(listed[0].id, first_id);
    }
}
