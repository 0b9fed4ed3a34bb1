//! Pipeline implementation.

use chrono::{DateTime, Utc};
use mnemon_analysis::{ContentAnalyzer, FileAnalysis, ProposalAction, SchemaInference, SchemaProposal};
use mnemon_governance::{
    update_kinds, GovernanceClient, ProposalKind, ProposalLog, ProposalRecord, ProposalState,
    UpdateSubmission,
};
use mnemon_lifecycle::LifecycleManager;
use mnemon_protocol::{AgentKind, Event, EventSink, JobSpec, ProposalId, RiskLevel, ShutdownToken};
use mnemon_schema::def::{FieldSpec, FieldType, TableSchema};
use mnemon_schema::TableStore;
use mnemon_training::TrainingTrigger;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Suffixes that mark temporary or editor files.
const SKIP_SUFFIXES: &[&str] = &["lock", "tmp", "bak", "swp", "swx", "part"];

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub watch_folders: Vec<PathBuf>,
    pub scan_interval_seconds: u64,
    pub approval_interval_seconds: u64,
    pub max_file_size_bytes: u64,
    /// Drafts below this confidence are retained, not handed off.
    pub handoff_confidence_floor: f64,
    /// Pending proposals older than this are discarded.
    pub stale_pending_hours: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            watch_folders: vec![
                PathBuf::from("training_data"),
                PathBuf::from("storage/uploads"),
                PathBuf::from("grace_training"),
            ],
            scan_interval_seconds: 30,
            approval_interval_seconds: 15,
            max_file_size_bytes: 100 * 1024 * 1024,
            handoff_confidence_floor: 0.7,
            stale_pending_hours: 24,
        }
    }
}

/// A drafted file waiting for the approval role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub path: String,
    pub file_key: String,
    pub analysis: FileAnalysis,
    pub proposal: SchemaProposal,
    pub confidence: f64,
    pub drafted_at: DateTime<Utc>,
}

/// Point-in-time pipeline statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestStats {
    pub running: bool,
    pub watch_folders: Vec<String>,
    pub processed_files: usize,
    pub drafts_awaiting_approval: usize,
    pub low_confidence_drafts: usize,
    pub pending_proposals: usize,
}

struct LoopHandles {
    token: ShutdownToken,
    staging: tokio::task::JoinHandle<()>,
    approval: tokio::task::JoinHandle<()>,
}

/// The auto-ingestion pipeline.
pub struct IngestionPipeline {
    config: IngestConfig,
    analyzer: ContentAnalyzer,
    inference: SchemaInference,
    store: Arc<TableStore>,
    governance: GovernanceClient,
    lifecycle: Arc<LifecycleManager>,
    training: Arc<TrainingTrigger>,
    events: Arc<dyn EventSink>,
    processed: Mutex<HashSet<String>>,
    drafts: Mutex<VecDeque<Draft>>,
    low_confidence: Mutex<Vec<Draft>>,
    pending: ProposalLog,
    loops: Mutex<Option<LoopHandles>>,
}

impl IngestionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: IngestConfig,
        store: Arc<TableStore>,
        governance: GovernanceClient,
        lifecycle: Arc<LifecycleManager>,
        training: Arc<TrainingTrigger>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            analyzer: ContentAnalyzer::new(),
            inference: SchemaInference::new(),
            store,
            governance,
            lifecycle,
            training,
            events,
            processed: Mutex::new(HashSet::new()),
            drafts: Mutex::new(VecDeque::new()),
            low_confidence: Mutex::new(Vec::new()),
            pending: ProposalLog::new(),
            loops: Mutex::new(None),
        }
    }

    /// Start both roles. Folders are created when missing. No-op when
    /// already running.
    pub fn start(self: &Arc<Self>, folders: Option<Vec<PathBuf>>) {
        let mut guard = self.loops.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            return;
        }

        let watch = folders.unwrap_or_else(|| self.config.watch_folders.clone());
        for folder in &watch {
            if let Err(e) = std::fs::create_dir_all(folder) {
                warn!("Could not create watch folder {}: {}", folder.display(), e);
            }
        }

        let token = ShutdownToken::new();

        let staging_pipeline = Arc::clone(self);
        let staging_token = token.clone();
        let staging_folders = watch.clone();
        let scan_interval = Duration::from_secs(self.config.scan_interval_seconds);
        let staging = tokio::spawn(async move {
            info!(
                "Auto-ingestion staging started, watching: {:?}",
                staging_folders
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
            );
            loop {
                staging_pipeline.scan_once(&staging_folders).await;
                if staging_token.sleep(scan_interval).await {
                    break;
                }
            }
            info!("Auto-ingestion staging stopped");
        });

        let approval_pipeline = Arc::clone(self);
        let approval_token = token.clone();
        let approval_interval = Duration::from_secs(self.config.approval_interval_seconds);
        let approval = tokio::spawn(async move {
            info!("Auto-ingestion approval drain started");
            loop {
                approval_pipeline.drain_approvals_once().await;
                if approval_token.sleep(approval_interval).await {
                    break;
                }
            }
            info!("Auto-ingestion approval drain stopped");
        });

        *guard = Some(LoopHandles {
            token,
            staging,
            approval,
        });
    }

    /// Stop both roles, waiting for them to exit.
    pub async fn stop(&self) {
        let handles = {
            let mut guard = self.loops.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        if let Some(handles) = handles {
            handles.token.cancel();
            let _ = handles.staging.await;
            let _ = handles.approval.await;
        }
    }

    pub fn is_running(&self) -> bool {
        let guard = self.loops.lock().unwrap_or_else(|e| e.into_inner());
        guard.is_some()
    }

    // === Staging role ===

    /// One scan pass over the watched folders.
    pub async fn scan_once(&self, folders: &[PathBuf]) {
        for folder in folders {
            if !folder.exists() {
                continue;
            }
            for entry in WalkDir::new(folder).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                self.stage_file(entry.path()).await;
            }
        }
    }

    async fn stage_file(&self, path: &Path) {
        let Some(file_key) = self.file_key_if_eligible(path) else {
            return;
        };

        // Probe for an earlier ingestion of the same path.
        match self
            .store
            .find_by_fingerprint("memory_documents", &path.to_string_lossy())
            .await
        {
            Ok(Some(_)) => {
                debug!("Already ingested, skipping: {}", path.display());
                self.mark_processed(file_key);
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Ingestion probe failed for {}: {}", path.display(), e);
            }
        }

        let analysis = self.analyzer.analyze(path);
        if !analysis.errors.is_empty() {
            // Retry on the next scan.
            warn!(
                "Analysis errors for {}, will retry: {:?}",
                path.display(),
                analysis.errors
            );
            return;
        }

        let known_tables = self.store.registry().list();
        let proposal = self.inference.propose(&analysis, &known_tables);
        info!(
            "Drafted {}: {} -> {} (confidence {:.2})",
            path.display(),
            proposal.action,
            proposal.target_table,
            proposal.confidence
        );

        let draft = Draft {
            path: path.to_string_lossy().to_string(),
            file_key: file_key.clone(),
            confidence: proposal.confidence,
            analysis,
            proposal,
            drafted_at: Utc::now(),
        };

        if draft.confidence >= self.config.handoff_confidence_floor {
            let mut drafts = self.drafts.lock().unwrap_or_else(|e| e.into_inner());
            drafts.push_back(draft);
        } else {
            let mut retained = self.low_confidence.lock().unwrap_or_else(|e| e.into_inner());
            retained.push(draft);
        }
        self.mark_processed(file_key);
    }

    /// Skip rules plus the process-local dedup key (`path:mtime:size`).
    fn file_key_if_eligible(&self, path: &Path) -> Option<String> {
        let name = path.file_name()?.to_string_lossy();
        if name.starts_with('.') || name.starts_with('~') {
            return None;
        }
        if let Some(ext) = path.extension() {
            if SKIP_SUFFIXES.contains(&ext.to_string_lossy().to_lowercase().as_str()) {
                return None;
            }
        }

        let meta = std::fs::metadata(path).ok()?;
        if meta.len() > self.config.max_file_size_bytes {
            debug!("Skipping oversized file: {}", path.display());
            return None;
        }

        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}:{}", path.display(), mtime, meta.len()));
        let key = format!("{:x}", hasher.finalize());

        let processed = self.processed.lock().unwrap_or_else(|e| e.into_inner());
        if processed.contains(&key) {
            return None;
        }
        Some(key)
    }

    fn mark_processed(&self, key: String) {
        let mut processed = self.processed.lock().unwrap_or_else(|e| e.into_inner());
        processed.insert(key);
    }

    // === Approval role ===

    /// One drain pass: submit every pending draft to governance and apply
    /// the approved ones. Also discards stale pending proposals.
    pub async fn drain_approvals_once(&self) {
        let stale = self
            .pending
            .discard_stale(chrono::Duration::hours(self.config.stale_pending_hours));
        if stale > 0 {
            info!("Discarded {} stale pending proposals", stale);
        }

        loop {
            let draft = {
                let mut drafts = self.drafts.lock().unwrap_or_else(|e| e.into_inner());
                drafts.pop_front()
            };
            let Some(draft) = draft else { break };
            self.propose_draft(draft).await;
        }
    }

    async fn propose_draft(&self, draft: Draft) {
        let (kind, update_kind) = match draft.proposal.action {
            ProposalAction::UseExisting => (ProposalKind::InsertRow, update_kinds::ROW_INSERT),
            ProposalAction::ExtendExisting => {
                (ProposalKind::ExtendTable, update_kinds::SCHEMA_MODIFY)
            }
            ProposalAction::CreateNew => (ProposalKind::CreateTable, update_kinds::SCHEMA_CREATE),
        };
        let risk = RiskLevel::from_confidence(draft.confidence);

        let mut record = ProposalRecord::new(
            kind,
            draft.proposal.target_table.clone(),
            draft.proposal.extracted_fields.clone(),
            draft.confidence,
            draft.proposal.reasoning.clone(),
        )
        .with_source_ref(draft.path.clone());

        let decision = self
            .governance
            .submit(UpdateSubmission::new(
                update_kind,
                vec!["memory_tables".to_string(), record.target_table.clone()],
                serde_json::json!({
                    "table_name": record.target_table.clone(),
                    "row_data": record.payload.clone(),
                    "source_file": draft.path.clone(),
                    "confidence": draft.confidence,
                }),
                risk,
                "auto_ingestion",
            ))
            .await;

        record.update_id = Some(decision.update_id);

        // A dead gateway may locally approve plain row inserts into
        // existing tables; anything that would change schema stays held.
        let locally_approved = decision.unavailable && kind == ProposalKind::InsertRow;

        if decision.approved || locally_approved {
            record.decide(if locally_approved {
                ProposalState::AutoApproved
            } else {
                ProposalState::Approved
            });
            if let Err(e) = self.apply(&record).await {
                error!("Failed to apply proposal for {}: {:#}", draft.path, e);
                self.log_failed_ingestion(&draft.path, &format!("{:#}", e))
                    .await;
            }
        } else {
            info!(
                "Awaiting approval for {} (proposal {})",
                draft.path, record.id
            );
            self.pending.put(record);
        }
    }

    /// Apply an approved proposal.
    async fn apply(&self, record: &ProposalRecord) -> anyhow::Result<()> {
        match record.kind {
            ProposalKind::InsertRow => self.apply_insert(record).await,
            ProposalKind::CreateTable => {
                self.create_table(&record.target_table, &record.payload)?;
                self.store.materialize().await?;
                self.apply_insert(record).await
            }
            ProposalKind::ExtendTable => {
                // Extension payloads carry the new nullable columns only.
                let fields = fields_from_payload(&record.payload);
                self.store
                    .registry()
                    .extend(&record.target_table, fields.clone())?;
                self.store.add_columns(&record.target_table, &fields).await?;
                Ok(())
            }
        }
    }

    async fn apply_insert(&self, record: &ProposalRecord) -> anyhow::Result<()> {
        let mut row_data = record.payload.clone();
        if let (Some(map), Some(update_id)) = (row_data.as_object_mut(), record.update_id) {
            map.insert(
                "governance_stamp".to_string(),
                serde_json::json!({"approved": true, "update_id": update_id.to_string()}),
            );
        }

        let outcome = self
            .lifecycle
            .execute_job(
                AgentKind::Ingestion,
                JobSpec::new(
                    AgentKind::Ingestion,
                    serde_json::json!({
                        "table_name": record.target_table,
                        "row_data": row_data,
                    }),
                ),
                true,
            )
            .await;

        if !outcome.success {
            anyhow::bail!(
                "ingestion job failed: {}",
                outcome.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }

        let result = outcome.result.unwrap_or_default();
        let row_id = result
            .get("row_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let trust_score = result
            .get("trust_score")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);

        if let Err(e) = self.training.on_inserted(&record.target_table).await {
            warn!("Training trigger failed for {}: {}", record.target_table, e);
        }

        self.events
            .publish(Event::RowInserted {
                table: record.target_table.clone(),
                row_id,
                trust_score,
                source_file: record.source_ref.clone(),
                at: Utc::now(),
            })
            .await;

        info!("Successfully ingested {:?}", record.source_ref);
        Ok(())
    }

    /// Derive a table definition from extracted fields and register it.
    fn create_table(&self, table: &str, payload: &serde_json::Value) -> anyhow::Result<()> {
        if self.store.registry().has(table) {
            return Ok(());
        }

        let mut schema = TableSchema::new(table)
            .with_description("Created by auto-ingestion")
            .with_field(FieldSpec::new("id", FieldType::Uuid).primary_key());
        for field in fields_from_payload(payload) {
            let field = if field.name == "file_path" {
                field.fingerprint()
            } else {
                field
            };
            schema.fields.push(field);
        }
        schema.append_standard_columns();
        self.store.registry().save_schema(&schema)?;
        Ok(())
    }

    async fn log_failed_ingestion(&self, path: &str, error: &str) {
        let result = self
            .store
            .insert(
                "memory_insights",
                &serde_json::json!({
                    "insight_type": "alert",
                    "content": format!("Failed to ingest: {}", error),
                    "file_path": path,
                    "generated_by": "auto_ingestion",
                    "confidence": 0.0,
                    "tags": ["failed_ingestion", "auto_ingest"],
                }),
                false,
            )
            .await;
        if let Err(e) = result {
            error!("Could not log failed ingestion for {}: {}", path, e);
        }
    }

    // === Pending proposals ===

    /// Drafts and proposals awaiting an external decision.
    pub fn pending_proposals(&self) -> Vec<ProposalRecord> {
        self.pending.list()
    }

    /// Manually approve a pending proposal.
    pub async fn approve_pending(&self, id: &ProposalId) -> bool {
        let Some(mut record) = self.pending.take(id) else {
            return false;
        };
        record.decide(ProposalState::Approved);

        match self.apply(&record).await {
            Ok(()) => {
                info!("Manually approved proposal {}", id);
                true
            }
            Err(e) => {
                error!("Failed to apply approved proposal {}: {:#}", id, e);
                if let Some(path) = &record.source_ref {
                    self.log_failed_ingestion(path, &format!("{:#}", e)).await;
                }
                false
            }
        }
    }

    /// Manually reject a pending proposal.
    pub async fn reject_pending(&self, id: &ProposalId, reason: Option<&str>) -> bool {
        let Some(mut record) = self.pending.take(id) else {
            return false;
        };
        record.decide(ProposalState::Rejected);

        if let Some(path) = &record.source_ref {
            self.log_failed_ingestion(path, reason.unwrap_or("Manually rejected"))
                .await;
        }
        info!("Rejected proposal {}", id);
        true
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            running: self.is_running(),
            watch_folders: self
                .config
                .watch_folders
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            processed_files: self.processed.lock().unwrap_or_else(|e| e.into_inner()).len(),
            drafts_awaiting_approval: self.drafts.lock().unwrap_or_else(|e| e.into_inner()).len(),
            low_confidence_drafts: self
                .low_confidence
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .len(),
            pending_proposals: self.pending.len(),
        }
    }
}

/// Infer nullable field specs from a JSON payload's value types.
fn fields_from_payload(payload: &serde_json::Value) -> Vec<FieldSpec> {
    let Some(map) = payload.as_object() else {
        return Vec::new();
    };
    map.iter()
        .filter(|(name, _)| {
            !matches!(
                name.as_str(),
                "id" | "trust_score" | "governance_stamp" | "created_at"
            )
        })
        .map(|(name, value)| {
            let field_type = match value {
                serde_json::Value::Bool(_) => FieldType::Boolean,
                serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => FieldType::Integer,
                serde_json::Value::Number(_) => FieldType::Float,
                serde_json::Value::String(_) => FieldType::String,
                _ => FieldType::Json,
            };
            FieldSpec::new(name.clone(), field_type).nullable()
        })
        .collect()
}
