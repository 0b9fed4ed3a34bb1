//! The gateway trait and the reply-normalization adapter.

use async_trait::async_trait;
use mnemon_protocol::{CorrelationId, RiskLevel};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Default RPC timeout for gateway submissions.
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Gateway rejected the submission: {0}")]
    Rejected(String),

    #[error("Gateway timed out")]
    Timeout,
}

/// A mutation proposal submitted for approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSubmission {
    pub kind: String,
    pub targets: Vec<String>,
    pub content: serde_json::Value,
    pub risk: RiskLevel,
    pub created_by: String,
}

impl UpdateSubmission {
    pub fn new(
        kind: impl Into<String>,
        targets: Vec<String>,
        content: serde_json::Value,
        risk: RiskLevel,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            targets,
            content,
            risk,
            created_by: created_by.into(),
        }
    }

    /// Confidence carried in the submission content, when present.
    pub fn confidence(&self) -> Option<f64> {
        self.content.get("confidence").and_then(|v| v.as_f64())
    }
}

/// What a gateway may hand back: either a structured decision object or a
/// bare correlation string. Both shapes occur in the wild and must be
/// treated identically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GatewayReply {
    Structured {
        #[serde(default)]
        approved: Option<bool>,
        #[serde(default)]
        update_id: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    },
    Correlation(String),
}

/// The normalized decision every caller works with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub approved: bool,
    pub pending: bool,
    pub update_id: CorrelationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The gateway itself could not be reached; the decision is the
    /// conservative fallback, not a real hold.
    #[serde(default)]
    pub unavailable: bool,
}

impl Decision {
    /// Normalize a gateway reply. Conservative: anything ambiguous is
    /// `approved=false, pending=true` with a synthesized correlation id.
    pub fn from_reply(reply: GatewayReply) -> Self {
        match reply {
            GatewayReply::Structured {
                approved,
                update_id,
                reason,
            } => {
                let update_id = update_id
                    .as_deref()
                    .and_then(|s| CorrelationId::parse(s).ok())
                    .unwrap_or_else(CorrelationId::new);
                match approved {
                    Some(true) => Decision {
                        approved: true,
                        pending: false,
                        update_id,
                        reason,
                        unavailable: false,
                    },
                    Some(false) => Decision {
                        approved: false,
                        pending: true,
                        update_id,
                        reason,
                        unavailable: false,
                    },
                    None => Decision {
                        approved: false,
                        pending: true,
                        update_id,
                        reason,
                        unavailable: false,
                    },
                }
            }
            // A bare string is a correlation token: the update was taken
            // but not decided.
            GatewayReply::Correlation(raw) => Decision {
                approved: false,
                pending: true,
                update_id: CorrelationId::parse(&raw).unwrap_or_else(|_| CorrelationId::new()),
                reason: None,
                unavailable: false,
            },
        }
    }

    /// The fallback used when the gateway could not be reached at all.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Decision {
            approved: false,
            pending: true,
            update_id: CorrelationId::new(),
            reason: Some(reason.into()),
            unavailable: true,
        }
    }
}

/// The governance gateway seam. Implementations may be local policy
/// engines or remote RPC clients.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn submit(&self, update: UpdateSubmission) -> Result<GatewayReply, GatewayError>;
}

/// Client wrapper that owns the timeout and the normalization step.
///
/// `submit` never fails: RPC errors and timeouts become pending decisions
/// with a synthesized correlation id.
#[derive(Clone)]
pub struct GovernanceClient {
    gateway: Arc<dyn Gateway>,
    timeout: Duration,
}

impl GovernanceClient {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            timeout: DEFAULT_GATEWAY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn submit(&self, update: UpdateSubmission) -> Decision {
        let kind = update.kind.clone();
        match tokio::time::timeout(self.timeout, self.gateway.submit(update)).await {
            Ok(Ok(reply)) => Decision::from_reply(reply),
            Ok(Err(e)) => {
                warn!("Gateway submission '{}' failed: {}", kind, e);
                Decision::unavailable(e.to_string())
            }
            Err(_) => {
                warn!("Gateway submission '{}' timed out", kind);
                Decision::unavailable("gateway timeout")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemon_protocol::RiskLevel;

    struct HangingGateway;

    #[async_trait]
    impl Gateway for HangingGateway {
        async fn submit(&self, _update: UpdateSubmission) -> Result<GatewayReply, GatewayError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!()
        }
    }

    struct FailingGateway;

    #[async_trait]
    impl Gateway for FailingGateway {
        async fn submit(&self, _update: UpdateSubmission) -> Result<GatewayReply, GatewayError> {
            Err(GatewayError::Unavailable("connection refused".into()))
        }
    }

    fn update() -> UpdateSubmission {
        UpdateSubmission::new(
            "memory_table_row_insert",
            vec!["memory_documents".into()],
            serde_json::json!({"confidence": 0.8}),
            RiskLevel::Medium,
            "test",
        )
    }

    #[test]
    fn structured_approval_normalizes() {
        let id = CorrelationId::new();
        let decision = Decision::from_reply(GatewayReply::Structured {
            approved: Some(true),
            update_id: Some(id.to_string()),
            reason: None,
        });
        assert!(decision.approved);
        assert!(!decision.pending);
        assert_eq!(decision.update_id, id);
    }

    #[test]
    fn bare_string_means_pending() {
        let id = CorrelationId::new();
        let decision = Decision::from_reply(GatewayReply::Correlation(id.to_string()));
        assert!(!decision.approved);
        assert!(decision.pending);
        assert_eq!(decision.update_id, id);
    }

    #[test]
    fn garbage_correlation_gets_synthesized_id() {
        let decision = Decision::from_reply(GatewayReply::Correlation("???".into()));
        assert!(decision.pending);
    }

    #[test]
    fn missing_approved_field_is_pending() {
        let decision = Decision::from_reply(GatewayReply::Structured {
            approved: None,
            update_id: None,
            reason: None,
        });
        assert!(!decision.approved);
        assert!(decision.pending);
    }

    #[test]
    fn reply_deserializes_both_shapes() {
        let structured: GatewayReply =
            serde_json::from_str(r#"{"approved": true, "update_id": "abc"}"#).unwrap();
        assert!(matches!(structured, GatewayReply::Structured { .. }));

        let bare: GatewayReply = serde_json::from_str(r#""corr-123""#).unwrap();
        assert!(matches!(bare, GatewayReply::Correlation(_)));
    }

    #[tokio::test]
    async fn timeout_degrades_to_pending() {
        let client = GovernanceClient::new(Arc::new(HangingGateway))
            .with_timeout(Duration::from_millis(20));
        let decision = client.submit(update()).await;
        assert!(!decision.approved);
        assert!(decision.pending);
    }

    #[tokio::test]
    async fn rpc_failure_degrades_to_pending() {
        let client = GovernanceClient::new(Arc::new(FailingGateway));
        let decision = client.submit(update()).await;
        assert!(!decision.approved);
        assert!(decision.pending);
        assert!(decision.reason.unwrap().contains("connection refused"));
    }
}
