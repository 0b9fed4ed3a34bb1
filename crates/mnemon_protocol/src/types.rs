//! Canonical enums and payload shapes.

use crate::ids::{AgentId, JobId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kinds of agent the lifecycle manager can spawn.
///
/// This is the CANONICAL definition - use this everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    SchemaInference,
    Ingestion,
    CrossDomainLearning,
}

impl AgentKind {
    pub const ALL: &'static [AgentKind] = &[
        AgentKind::SchemaInference,
        AgentKind::Ingestion,
        AgentKind::CrossDomainLearning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::SchemaInference => "schema_inference",
            AgentKind::Ingestion => "ingestion",
            AgentKind::CrossDomainLearning => "cross_domain_learning",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schema_inference" => Ok(AgentKind::SchemaInference),
            "ingestion" => Ok(AgentKind::Ingestion),
            "cross_domain_learning" => Ok(AgentKind::CrossDomainLearning),
            _ => Err(format!(
                "Invalid agent kind: '{}'. Expected: schema_inference, ingestion, or cross_domain_learning",
                s
            )),
        }
    }
}

/// Lifecycle states of an agent instance. `Offline` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Initializing,
    Idle,
    Busy,
    Offline,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Initializing => "initializing",
            AgentState::Idle => "idle",
            AgentState::Busy => "busy",
            AgentState::Offline => "offline",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// States of a job in the queue / completed map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A job handed to an agent. The payload shape is kind-specific and left
/// as JSON; executors decode the fields they need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: JobId,
    pub kind: AgentKind,
    pub payload: serde_json::Value,
    pub submitted_at: DateTime<Utc>,
}

impl JobSpec {
    pub fn new(kind: AgentKind, payload: serde_json::Value) -> Self {
        Self {
            id: JobId::new(),
            kind,
            payload,
            submitted_at: Utc::now(),
        }
    }
}

/// The outcome an agent reports for one job execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub agent_id: AgentId,
}

/// Point-in-time view of an agent, safe to hand to external callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub kind: AgentKind,
    pub mission: String,
    pub capabilities: Vec<String>,
    pub state: AgentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_job: Option<JobId>,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub success_rate: f64,
    pub trust_score: f64,
    pub spawned_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_job_at: Option<DateTime<Utc>>,
}

/// Governance risk tiers for mutation proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    /// Risk tier derived from a proposal's confidence.
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.9 {
            RiskLevel::Low
        } else if confidence >= 0.7 {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            _ => Err(format!(
                "Invalid risk level: '{}'. Expected: low, medium, high, or critical",
                s
            )),
        }
    }
}

/// Alert severities, most severe first in sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Critical,
    Error,
    Warning,
    Info,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Critical => "critical",
            AlertSeverity::Error => "error",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Info => "info",
        }
    }

    /// Rank for sorting: lower is more severe.
    pub fn rank(&self) -> u8 {
        match self {
            AlertSeverity::Critical => 0,
            AlertSeverity::Error => 1,
            AlertSeverity::Warning => 2,
            AlertSeverity::Info => 3,
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(AlertSeverity::Critical),
            "error" => Ok(AlertSeverity::Error),
            "warning" => Ok(AlertSeverity::Warning),
            "info" => Ok(AlertSeverity::Info),
            _ => Err(format!(
                "Invalid alert severity: '{}'. Expected: critical, error, warning, or info",
                s
            )),
        }
    }
}

/// Severity of a detected contradiction between rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContradictionSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ContradictionSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContradictionSeverity::Low => "low",
            ContradictionSeverity::Medium => "medium",
            ContradictionSeverity::High => "high",
            ContradictionSeverity::Critical => "critical",
        }
    }

    /// Trust penalty applied per contradiction of this severity.
    pub fn trust_penalty(&self) -> f64 {
        match self {
            ContradictionSeverity::Low => 0.05,
            ContradictionSeverity::Medium => 0.15,
            ContradictionSeverity::High => 0.30,
            ContradictionSeverity::Critical => 0.50,
        }
    }
}

impl fmt::Display for ContradictionSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_kind_round_trip() {
        for kind in AgentKind::ALL {
            assert_eq!(kind.as_str().parse::<AgentKind>().unwrap(), *kind);
        }
        assert!("orchestrator".parse::<AgentKind>().is_err());
    }

    #[test]
    fn risk_from_confidence_tiers() {
        assert_eq!(RiskLevel::from_confidence(0.95), RiskLevel::Low);
        assert_eq!(RiskLevel::from_confidence(0.9), RiskLevel::Low);
        assert_eq!(RiskLevel::from_confidence(0.75), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_confidence(0.7), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_confidence(0.69), RiskLevel::High);
    }

    #[test]
    fn severity_sort_rank() {
        assert!(AlertSeverity::Critical.rank() < AlertSeverity::Error.rank());
        assert!(AlertSeverity::Error.rank() < AlertSeverity::Warning.rank());
        assert!(AlertSeverity::Warning.rank() < AlertSeverity::Info.rank());
    }

    #[test]
    fn contradiction_penalties_match_policy() {
        assert_eq!(ContradictionSeverity::Low.trust_penalty(), 0.05);
        assert_eq!(ContradictionSeverity::Critical.trust_penalty(), 0.50);
    }

    #[test]
    fn job_spec_serializes_with_snake_case_kind() {
        let spec = JobSpec::new(AgentKind::Ingestion, serde_json::json!({"table": "t"}));
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["kind"], "ingestion");
    }
}
