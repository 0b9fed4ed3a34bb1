//! The control-plane API facade.
//!
//! Thin, typed surface over the subsystems for external callers. Returns
//! decoded domain types only; errors follow the taxonomy below and carry
//! no transport detail.

use crate::config::Config;
use crate::runtime::{self, Subsystems};
use mnemon_alerts::{Alert, AlertSummary};
use mnemon_analysis::{ContentAnalyzer, FileAnalysis, SchemaInference, SchemaProposal};
use mnemon_governance::{update_kinds, ProposalRecord, UpdateSubmission};
use mnemon_lifecycle::{JobRecord, LifecycleMetrics};
use mnemon_protocol::{
    AgentId, AgentKind, AgentSnapshot, AlertSeverity, CorrelationId, JobId, JobOutcome, JobSpec,
    ProposalId, RiskLevel,
};
use mnemon_schema::{QueryOptions, Row, SchemaError, TableSchema};
use mnemon_training::TrainingStatus;
use mnemon_trust::{ContradictionRecord, ContradictionSummary, TrustReport};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Caller-visible error taxonomy.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown agent kind: {0}")]
    UnknownAgentKind(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    #[error("Dependency unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<SchemaError> for ApiError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::UnknownTable(table) => ApiError::UnknownTable(table),
            SchemaError::InvalidId(id) => ApiError::InvalidInput(format!("invalid id: {id}")),
            SchemaError::Validation { .. } => ApiError::Validation(err.to_string()),
            SchemaError::Parse { .. } | SchemaError::InvalidDefinition { .. } => {
                ApiError::Validation(err.to_string())
            }
            SchemaError::Database(e) => ApiError::Unavailable(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Table listing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub field_count: usize,
    pub description: String,
}

/// Result of a governed row insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernedInsert {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<serde_json::Value>,
    pub update_id: CorrelationId,
    pub pending: bool,
}

/// File analysis plus proposal, as returned by the analyze verb.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeResult {
    pub analysis: FileAnalysis,
    pub proposal: SchemaProposal,
}

/// The control plane. One per process.
pub struct ControlPlane {
    subsystems: Subsystems,
    analyzer: ContentAnalyzer,
    inference: SchemaInference,
}

impl ControlPlane {
    /// Build from configuration.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let subsystems = runtime::build(config).await?;
        Ok(Self {
            subsystems,
            analyzer: ContentAnalyzer::new(),
            inference: SchemaInference::new(),
        })
    }

    pub fn subsystems(&self) -> &Subsystems {
        &self.subsystems
    }

    pub fn start_background_loops(&self) {
        self.subsystems.start_all();
    }

    pub async fn shutdown(&self) {
        self.subsystems.stop_all().await;
    }

    // === Agent lifecycle ===

    pub async fn spawn_agent(
        &self,
        kind: &str,
        instance_id: Option<String>,
    ) -> ApiResult<AgentSnapshot> {
        let kind = parse_kind(kind)?;
        Ok(self.subsystems.lifecycle.spawn(kind, instance_id).await)
    }

    pub async fn execute_job(
        &self,
        kind: &str,
        payload: serde_json::Value,
        reuse: bool,
    ) -> ApiResult<JobOutcome> {
        let kind = parse_kind(kind)?;
        let job = JobSpec::new(kind, payload);
        Ok(self.subsystems.lifecycle.execute_job(kind, job, reuse).await)
    }

    pub fn submit_job(&self, kind: &str, payload: serde_json::Value) -> ApiResult<JobId> {
        let kind = parse_kind(kind)?;
        Ok(self.subsystems.lifecycle.submit_job(kind, payload))
    }

    pub async fn process_queue(&self, max_concurrent: Option<usize>) -> LifecycleMetrics {
        self.subsystems.lifecycle.process_queue(max_concurrent).await;
        self.subsystems.lifecycle.metrics()
    }

    pub async fn terminate_agent(&self, agent_id: &str) -> ApiResult<bool> {
        let id = parse_agent_id(agent_id)?;
        Ok(self.subsystems.lifecycle.terminate(&id).await)
    }

    pub async fn revoke_agent(&self, agent_id: &str, reason: &str) -> ApiResult<()> {
        let id = parse_agent_id(agent_id)?;
        self.subsystems.lifecycle.revoke(&id, reason).await;
        Ok(())
    }

    pub fn agents(&self) -> Vec<AgentSnapshot> {
        self.subsystems.lifecycle.all_agents()
    }

    pub fn agent(&self, agent_id: &str) -> ApiResult<AgentSnapshot> {
        let id = parse_agent_id(agent_id)?;
        self.subsystems
            .lifecycle
            .status(&id)
            .ok_or_else(|| ApiError::InvalidInput(format!("no active agent {agent_id}")))
    }

    pub fn lifecycle_metrics(&self) -> LifecycleMetrics {
        self.subsystems.lifecycle.metrics()
    }

    pub fn job_record(&self, job_id: &str) -> ApiResult<JobRecord> {
        let id = JobId::parse(job_id)
            .map_err(|e| ApiError::InvalidInput(format!("invalid job id: {e}")))?;
        self.subsystems
            .lifecycle
            .job_record(&id)
            .ok_or_else(|| ApiError::UnknownJob(job_id.to_string()))
    }

    pub fn start_lifecycle_monitoring(&self) {
        self.subsystems.lifecycle.start_monitoring();
    }

    pub async fn stop_lifecycle_monitoring(&self) {
        self.subsystems.lifecycle.stop_monitoring().await;
    }

    // === Memory tables ===

    pub fn tables(&self) -> Vec<TableInfo> {
        self.subsystems
            .registry
            .list()
            .into_iter()
            .filter_map(|name| self.subsystems.registry.get(&name))
            .map(|schema| TableInfo {
                name: schema.table_name.clone(),
                field_count: schema.field_count(),
                description: schema.description.clone(),
            })
            .collect()
    }

    pub fn table_schema(&self, table: &str) -> ApiResult<TableSchema> {
        Ok(self.subsystems.registry.require(table)?)
    }

    pub async fn rows(
        &self,
        table: &str,
        limit: Option<u32>,
        offset: Option<u32>,
        filters: Option<serde_json::Value>,
    ) -> ApiResult<Vec<Row>> {
        let filters = match filters {
            Some(serde_json::Value::Object(map)) => Some(map),
            Some(other) => {
                return Err(ApiError::InvalidInput(format!(
                    "filters must be a JSON object, got {other}"
                )))
            }
            None => None,
        };
        let opts = QueryOptions {
            filters,
            limit: limit.or(Some(100)),
            offset,
            order_by: None,
        };
        Ok(self.subsystems.store.query(table, opts).await?)
    }

    /// Governed row insert: submits to the gateway, inserts on approval.
    pub async fn insert_row(&self, table: &str, data: serde_json::Value) -> ApiResult<GovernedInsert> {
        self.subsystems.registry.require(table)?;

        let decision = self
            .subsystems
            .governance
            .submit(UpdateSubmission::new(
                update_kinds::ROW_INSERT,
                vec!["memory_tables".to_string(), table.to_string()],
                serde_json::json!({
                    "table_name": table,
                    "row_data": data.clone(),
                    "confidence": 1.0,
                }),
                RiskLevel::Medium,
                "control_plane_api",
            ))
            .await;

        if !decision.approved {
            return Ok(GovernedInsert {
                row: None,
                update_id: decision.update_id,
                pending: true,
            });
        }

        let mut stamped = data;
        if let Some(map) = stamped.as_object_mut() {
            map.insert(
                "governance_stamp".to_string(),
                serde_json::json!({"approved": true, "update_id": decision.update_id.to_string()}),
            );
        }
        let row = self.subsystems.store.insert(table, &stamped, true).await?;
        if let Err(e) = self.subsystems.training.on_inserted(table).await {
            tracing::warn!("Training trigger failed for {}: {}", table, e);
        }

        Ok(GovernedInsert {
            row: Some(row.to_json()),
            update_id: decision.update_id,
            pending: false,
        })
    }

    pub async fn update_row(
        &self,
        table: &str,
        id: &str,
        patch: serde_json::Value,
    ) -> ApiResult<bool> {
        Ok(self.subsystems.store.update(table, id, &patch).await?)
    }

    /// Analyze a file and propose a target table, without ingesting.
    pub fn analyze(&self, file_path: &str) -> ApiResult<AnalyzeResult> {
        if file_path.trim().is_empty() {
            return Err(ApiError::InvalidInput("file_path must not be empty".into()));
        }
        let analysis = self.analyzer.analyze(Path::new(file_path));
        let proposal = self
            .inference
            .propose(&analysis, &self.subsystems.registry.list());
        Ok(AnalyzeResult { analysis, proposal })
    }

    // === Auto-ingestion ===

    pub fn start_ingestion(&self, folders: Option<Vec<PathBuf>>) {
        self.subsystems.pipeline.start(folders);
    }

    pub async fn stop_ingestion(&self) {
        self.subsystems.pipeline.stop().await;
    }

    pub fn pending_ingestions(&self) -> Vec<ProposalRecord> {
        self.subsystems.pipeline.pending_proposals()
    }

    pub async fn decide_ingestion(
        &self,
        approval_id: &str,
        approved: bool,
        reason: Option<&str>,
    ) -> ApiResult<bool> {
        let id = ProposalId::parse(approval_id)
            .map_err(|e| ApiError::InvalidInput(format!("invalid approval id: {e}")))?;
        if approved {
            Ok(self.subsystems.pipeline.approve_pending(&id).await)
        } else {
            Ok(self.subsystems.pipeline.reject_pending(&id, reason).await)
        }
    }

    pub fn ingestion_stats(&self) -> mnemon_ingest::IngestStats {
        self.subsystems.pipeline.stats()
    }

    // === Alerts ===

    pub fn active_alerts(&self, severity: Option<&str>) -> ApiResult<Vec<Alert>> {
        let severity = severity
            .map(|s| {
                s.parse::<AlertSeverity>()
                    .map_err(ApiError::InvalidInput)
            })
            .transpose()?;
        Ok(self.subsystems.alerts.active(severity))
    }

    pub fn alert_summary(&self) -> AlertSummary {
        self.subsystems.alerts.summary()
    }

    pub fn acknowledge_alert(&self, id: &str) -> bool {
        self.subsystems.alerts.acknowledge(id)
    }

    pub fn resolve_alert(&self, id: &str) -> bool {
        self.subsystems.alerts.resolve(id)
    }

    pub fn start_alert_monitoring(&self) {
        self.subsystems.alerts.start_monitoring(std::time::Duration::from_secs(
            self.subsystems.config.alert_interval_seconds,
        ));
    }

    pub async fn stop_alert_monitoring(&self) {
        self.subsystems.alerts.stop_monitoring().await;
    }

    // === Trust & contradictions ===

    pub async fn trust_report(&self) -> ApiResult<TrustReport> {
        Ok(self.subsystems.trust.report().await?)
    }

    /// Re-run contradiction detection, then rescore the table against the
    /// fresh snapshot.
    pub async fn rescore(&self, table: &str) -> ApiResult<usize> {
        self.subsystems.registry.require(table)?;
        self.subsystems
            .refresh_contradictions()
            .await?;
        let snapshot = self.subsystems.snapshot.get();
        Ok(self.subsystems.trust.rescore(table, 1000, &snapshot).await?)
    }

    pub async fn contradictions(&self, table: &str) -> ApiResult<Vec<ContradictionRecord>> {
        self.subsystems.registry.require(table)?;
        Ok(self.subsystems.detector.detect(table, 1000).await?)
    }

    pub async fn contradiction_summary(&self) -> ApiResult<ContradictionSummary> {
        let snapshot = self.subsystems.detector.scan_all(1000).await?;
        Ok(mnemon_trust::ContradictionDetector::summarize(&snapshot))
    }

    // === Training ===

    pub async fn training_status(&self) -> ApiResult<BTreeMap<String, TrainingStatus>> {
        self.subsystems
            .training
            .status()
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))
    }

    pub async fn force_training(&self, table: &str) -> ApiResult<()> {
        self.subsystems
            .training
            .force_training(table)
            .await
            .map_err(|e| match e {
                mnemon_training::TrainingError::NoPolicy(t) => ApiError::UnknownTable(t),
                other => ApiError::Internal(other.to_string()),
            })
    }
}

fn parse_kind(kind: &str) -> ApiResult<AgentKind> {
    kind.parse::<AgentKind>()
        .map_err(|_| ApiError::UnknownAgentKind(kind.to_string()))
}

fn parse_agent_id(agent_id: &str) -> ApiResult<AgentId> {
    AgentId::parse(agent_id).map_err(|e| ApiError::InvalidInput(format!("invalid agent id: {e}")))
}
