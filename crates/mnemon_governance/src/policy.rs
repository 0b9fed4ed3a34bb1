//! Local policy gateway.
//!
//! Implements the risk-tier policy in-process: low risk auto-approves,
//! medium auto-approves at or above a configurable confidence floor,
//! high and critical always hold for an external decision. Held updates
//! stay queryable and can be decided manually.

use crate::gateway::{Gateway, GatewayError, GatewayReply, UpdateSubmission};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mnemon_protocol::{CorrelationId, RiskLevel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

/// Default confidence floor for auto-approving medium-risk updates.
pub const DEFAULT_MEDIUM_CONFIDENCE_FLOOR: f64 = 0.75;

/// An update held for an external decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeldUpdate {
    pub update_id: CorrelationId,
    pub kind: String,
    pub targets: Vec<String>,
    pub content: serde_json::Value,
    pub risk: RiskLevel,
    pub created_by: String,
    pub held_at: DateTime<Utc>,
}

/// In-process gateway applying the risk-tier policy.
pub struct PolicyGateway {
    medium_confidence_floor: f64,
    held: Mutex<HashMap<CorrelationId, HeldUpdate>>,
    audit: Mutex<Vec<(String, RiskLevel)>>,
}

impl Default for PolicyGateway {
    fn default() -> Self {
        Self::new(DEFAULT_MEDIUM_CONFIDENCE_FLOOR)
    }
}

impl PolicyGateway {
    pub fn new(medium_confidence_floor: f64) -> Self {
        Self {
            medium_confidence_floor,
            held: Mutex::new(HashMap::new()),
            audit: Mutex::new(Vec::new()),
        }
    }

    /// Held updates awaiting an external decision.
    pub fn held_updates(&self) -> Vec<HeldUpdate> {
        let guard = self.held.lock().unwrap_or_else(|e| e.into_inner());
        let mut held: Vec<HeldUpdate> = guard.values().cloned().collect();
        held.sort_by_key(|h| h.held_at);
        held
    }

    /// Decide a held update. Returns `false` when the id is unknown
    /// (already decided, or never held).
    pub fn decide(&self, update_id: &CorrelationId, approve: bool, reason: Option<&str>) -> bool {
        let removed = {
            let mut guard = self.held.lock().unwrap_or_else(|e| e.into_inner());
            guard.remove(update_id)
        };
        match removed {
            Some(held) => {
                info!(
                    "Held update {} ({}) {}: {}",
                    update_id,
                    held.kind,
                    if approve { "approved" } else { "rejected" },
                    reason.unwrap_or("no reason given")
                );
                true
            }
            None => false,
        }
    }

    /// Kinds and risks of everything ever submitted (audit trail).
    pub fn audit_log(&self) -> Vec<(String, RiskLevel)> {
        self.audit.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn hold(&self, update: UpdateSubmission) -> CorrelationId {
        let update_id = CorrelationId::new();
        let held = HeldUpdate {
            update_id,
            kind: update.kind,
            targets: update.targets,
            content: update.content,
            risk: update.risk,
            created_by: update.created_by,
            held_at: Utc::now(),
        };
        let mut guard = self.held.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(update_id, held);
        update_id
    }
}

#[async_trait]
impl Gateway for PolicyGateway {
    async fn submit(&self, update: UpdateSubmission) -> Result<GatewayReply, GatewayError> {
        {
            let mut audit = self.audit.lock().unwrap_or_else(|e| e.into_inner());
            audit.push((update.kind.clone(), update.risk));
        }

        let approved = match update.risk {
            RiskLevel::Low => true,
            RiskLevel::Medium => update
                .confidence()
                .map(|c| c >= self.medium_confidence_floor)
                .unwrap_or(false),
            RiskLevel::High | RiskLevel::Critical => false,
        };

        if approved {
            Ok(GatewayReply::Structured {
                approved: Some(true),
                update_id: Some(CorrelationId::new().to_string()),
                reason: None,
            })
        } else {
            let update_id = self.hold(update);
            Ok(GatewayReply::Structured {
                approved: Some(false),
                update_id: Some(update_id.to_string()),
                reason: Some("held for external approval".to_string()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Decision, GovernanceClient};
    use std::sync::Arc;

    fn submission(risk: RiskLevel, confidence: f64) -> UpdateSubmission {
        UpdateSubmission::new(
            "memory_table_row_insert",
            vec!["memory_documents".into()],
            serde_json::json!({"confidence": confidence}),
            risk,
            "test",
        )
    }

    #[tokio::test]
    async fn low_risk_auto_approves() {
        let gateway = PolicyGateway::default();
        let reply = gateway.submit(submission(RiskLevel::Low, 0.0)).await.unwrap();
        let decision = Decision::from_reply(reply);
        assert!(decision.approved);
    }

    #[tokio::test]
    async fn medium_risk_respects_confidence_floor() {
        let gateway = PolicyGateway::new(0.75);

        let approve = gateway
            .submit(submission(RiskLevel::Medium, 0.8))
            .await
            .unwrap();
        assert!(Decision::from_reply(approve).approved);

        let hold = gateway
            .submit(submission(RiskLevel::Medium, 0.7))
            .await
            .unwrap();
        let decision = Decision::from_reply(hold);
        assert!(!decision.approved);
        assert!(decision.pending);
        assert_eq!(gateway.held_updates().len(), 1);
    }

    #[tokio::test]
    async fn high_risk_always_holds() {
        let gateway = PolicyGateway::default();
        let reply = gateway
            .submit(submission(RiskLevel::High, 0.99))
            .await
            .unwrap();
        let decision = Decision::from_reply(reply);
        assert!(decision.pending);
        assert_eq!(gateway.held_updates().len(), 1);
    }

    #[tokio::test]
    async fn decide_clears_held_update_once() {
        let gateway = PolicyGateway::default();
        let reply = gateway
            .submit(submission(RiskLevel::High, 0.5))
            .await
            .unwrap();
        let decision = Decision::from_reply(reply);

        assert!(gateway.decide(&decision.update_id, true, Some("reviewed")));
        assert!(!gateway.decide(&decision.update_id, true, None));
        assert!(gateway.held_updates().is_empty());
    }

    #[tokio::test]
    async fn client_integration_normalizes_policy_replies() {
        let gateway = Arc::new(PolicyGateway::default());
        let client = GovernanceClient::new(gateway);
        let decision = client.submit(submission(RiskLevel::Low, 0.0)).await;
        assert!(decision.approved);
        assert!(!decision.pending);
    }
}
