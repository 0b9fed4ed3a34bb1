//! In-process event fan-out.
//!
//! Subsystems publish domain events (row inserted, training required,
//! agent revoked) without knowing who listens. Fan-out is fire-and-forget:
//! a publish with no subscribers is not an error, and slow subscribers
//! lose old events rather than backpressuring the publisher.

use crate::ids::{AgentId, ProposalId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Domain events published on the control-plane bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A row passed governance and landed in a table.
    RowInserted {
        table: String,
        row_id: String,
        trust_score: f64,
        source_file: Option<String>,
        at: DateTime<Utc>,
    },
    /// A table crossed its training policy thresholds.
    TrainingRequired {
        table: String,
        training_type: String,
        row_count: u64,
        at: DateTime<Utc>,
    },
    /// An agent was revoked and terminated.
    AgentRevoked {
        agent_id: AgentId,
        reason: String,
        at: DateTime<Utc>,
    },
    /// A governance proposal moved to a terminal decision.
    ProposalDecided {
        proposal_id: ProposalId,
        approved: bool,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::RowInserted { .. } => "row_inserted",
            Event::TrainingRequired { .. } => "training_required",
            Event::AgentRevoked { .. } => "agent_revoked",
            Event::ProposalDecided { .. } => "proposal_decided",
        }
    }
}

/// Anything that accepts published events. The bus implements this; tests
/// substitute recording sinks.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: Event);
}

/// Broadcast-backed event bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

pub type EventReceiver = broadcast::Receiver<Event>;

impl EventBus {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventSink for EventBus {
    async fn publish(&self, event: Event) {
        // A send error just means nobody is listening right now.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(Event::TrainingRequired {
            table: "memory_documents".into(),
            training_type: "document_embedding".into(),
            row_count: 50,
            at: Utc::now(),
        })
        .await;
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(Event::RowInserted {
            table: "memory_documents".into(),
            row_id: "abc".into(),
            trust_score: 0.8,
            source_file: None,
            at: Utc::now(),
        })
        .await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), "row_inserted");
    }
}
