//! The three shipped agent kinds.
//!
//! Each kind is an [`JobExecutor`] plus a manifest built by the factory.
//! Executors decode only the payload fields they need and enforce their
//! own constraints (formats, file sizes, table and row caps).

use crate::executor::JobExecutor;
use async_trait::async_trait;
use mnemon_analysis::{ContentAnalyzer, SchemaInference};
use mnemon_protocol::JobSpec;
use mnemon_schema::{QueryOptions, SchemaRegistry, TableStore};
use mnemon_trust::{SnapshotCell, TrustEngine};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// File analysis and schema proposal. Read-only.
pub struct SchemaInferenceExecutor {
    registry: Arc<SchemaRegistry>,
    analyzer: ContentAnalyzer,
    inference: SchemaInference,
    allowed_formats: Vec<String>,
    max_file_size_mb: u64,
}

#[derive(Deserialize)]
struct InferencePayload {
    file_path: String,
}

impl SchemaInferenceExecutor {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        allowed_formats: Vec<String>,
        max_file_size_mb: u64,
    ) -> Self {
        Self {
            registry,
            analyzer: ContentAnalyzer::new(),
            inference: SchemaInference::new(),
            allowed_formats,
            max_file_size_mb,
        }
    }
}

#[async_trait]
impl JobExecutor for SchemaInferenceExecutor {
    async fn run(&self, job: &JobSpec) -> anyhow::Result<serde_json::Value> {
        let payload: InferencePayload = serde_json::from_value(job.payload.clone())?;
        let path = Path::new(&payload.file_path);

        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !self.allowed_formats.is_empty() && !self.allowed_formats.contains(&ext) {
            anyhow::bail!("format '{}' is not in this agent's allowed formats", ext);
        }
        if let Ok(meta) = std::fs::metadata(path) {
            let limit = self.max_file_size_mb * 1024 * 1024;
            if meta.len() > limit {
                anyhow::bail!(
                    "file is {} bytes, over the {} MB limit",
                    meta.len(),
                    self.max_file_size_mb
                );
            }
        }

        let analysis = self.analyzer.analyze(path);
        let known_tables = self.registry.list();
        let proposal = self.inference.propose(&analysis, &known_tables);
        let confidence = proposal.confidence;
        let recommended_table = proposal.target_table.clone();

        Ok(serde_json::json!({
            "analysis": analysis,
            "proposal": proposal,
            "confidence": confidence,
            "recommended_table": recommended_table,
        }))
    }
}

/// Row insertion plus trust scoring. The write path of the pipeline.
pub struct IngestionExecutor {
    store: Arc<TableStore>,
    snapshot: Arc<SnapshotCell>,
}

#[derive(Deserialize)]
struct IngestionPayload {
    table_name: String,
    row_data: serde_json::Value,
}

impl IngestionExecutor {
    pub fn new(store: Arc<TableStore>, snapshot: Arc<SnapshotCell>) -> Self {
        Self { store, snapshot }
    }
}

#[async_trait]
impl JobExecutor for IngestionExecutor {
    async fn run(&self, job: &JobSpec) -> anyhow::Result<serde_json::Value> {
        let payload: IngestionPayload = serde_json::from_value(job.payload.clone())?;

        let row = self
            .store
            .insert(&payload.table_name, &payload.row_data, true)
            .await?;
        let row_id = row
            .id()
            .ok_or_else(|| anyhow::anyhow!("inserted row has no id"))?;

        // Score against the previous contradiction pass and persist.
        let schema = self.store.registry().require(&payload.table_name)?;
        let trust = TrustEngine::score(&schema, &row, &self.snapshot.get());
        self.store
            .update(
                &payload.table_name,
                &row_id,
                &serde_json::json!({"trust_score": trust}),
            )
            .await?;

        debug!(
            "Ingested row {} into {} (trust {:.2})",
            row_id, payload.table_name, trust
        );

        Ok(serde_json::json!({
            "row_id": row_id,
            "trust_score": trust,
            "table_name": payload.table_name,
        }))
    }
}

/// Multi-table query and pattern summary. Read-only.
pub struct CrossDomainExecutor {
    store: Arc<TableStore>,
    max_tables: usize,
    max_rows_per_table: u32,
}

#[derive(Deserialize)]
struct CrossDomainPayload {
    #[serde(default)]
    query_spec: QuerySpec,
}

#[derive(Deserialize, Default)]
struct QuerySpec {
    #[serde(default)]
    tables: Vec<String>,
    #[serde(default)]
    limit: Option<u32>,
}

impl CrossDomainExecutor {
    pub fn new(store: Arc<TableStore>, max_tables: usize, max_rows_per_table: u32) -> Self {
        Self {
            store,
            max_tables,
            max_rows_per_table,
        }
    }
}

#[async_trait]
impl JobExecutor for CrossDomainExecutor {
    async fn run(&self, job: &JobSpec) -> anyhow::Result<serde_json::Value> {
        let payload: CrossDomainPayload = serde_json::from_value(job.payload.clone())?;

        let mut tables = payload.query_spec.tables;
        if tables.is_empty() {
            tables = self.store.registry().list();
        }
        tables.truncate(self.max_tables);

        let limit = payload
            .query_spec
            .limit
            .unwrap_or(self.max_rows_per_table)
            .min(self.max_rows_per_table);

        let mut per_table = serde_json::Map::new();
        let mut total_rows = 0usize;
        for table in &tables {
            let rows = self
                .store
                .query(table, QueryOptions::default().with_limit(limit))
                .await?;
            total_rows += rows.len();

            let avg_trust = if rows.is_empty() {
                0.0
            } else {
                rows.iter().map(|r| r.trust_score()).sum::<f64>() / rows.len() as f64
            };
            per_table.insert(
                table.clone(),
                serde_json::json!({
                    "row_count": rows.len(),
                    "avg_trust": avg_trust,
                }),
            );
        }

        Ok(serde_json::json!({
            "results": per_table,
            "patterns": {
                "total_rows": total_rows,
                "tables_queried": tables.len(),
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemon_protocol::AgentKind;
    use mnemon_schema::builtin::register_builtins;
    use std::io::Write;

    async fn store() -> Arc<TableStore> {
        let registry = Arc::new(SchemaRegistry::new("/nonexistent"));
        register_builtins(&registry).unwrap();
        let store = Arc::new(TableStore::in_memory(registry).await.unwrap());
        store.materialize().await.unwrap();
        store
    }

    #[tokio::test]
    async fn inference_executor_analyzes_and_proposes() {
        let store = store().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"Alpha\n\nHello.").unwrap();

        let executor = SchemaInferenceExecutor::new(
            Arc::clone(store.registry()),
            vec!["txt".into(), "md".into()],
            100,
        );
        let job = JobSpec::new(
            AgentKind::SchemaInference,
            serde_json::json!({"file_path": path.to_string_lossy()}),
        );
        let result = executor.run(&job).await.unwrap();
        assert_eq!(result["recommended_table"], "memory_documents");
        assert!(result["confidence"].as_f64().unwrap() >= 0.9);
    }

    #[tokio::test]
    async fn inference_executor_rejects_disallowed_format() {
        let store = store().await;
        let executor =
            SchemaInferenceExecutor::new(Arc::clone(store.registry()), vec!["txt".into()], 100);
        let job = JobSpec::new(
            AgentKind::SchemaInference,
            serde_json::json!({"file_path": "/tmp/evil.exe"}),
        );
        assert!(executor.run(&job).await.is_err());
    }

    #[tokio::test]
    async fn ingestion_executor_inserts_and_scores() {
        let store = store().await;
        let executor = IngestionExecutor::new(Arc::clone(&store), Arc::new(SnapshotCell::new()));
        let job = JobSpec::new(
            AgentKind::Ingestion,
            serde_json::json!({
                "table_name": "memory_documents",
                "row_data": {"title": "Alpha", "file_path": "/a", "created_by": "auto_ingestion"},
            }),
        );

        let result = executor.run(&job).await.unwrap();
        let trust = result["trust_score"].as_f64().unwrap();
        assert!(trust > 0.0 && trust <= 1.0);

        let row_id = result["row_id"].as_str().unwrap();
        let row = store.get("memory_documents", row_id).await.unwrap().unwrap();
        assert_eq!(row.trust_score(), trust);
    }

    #[tokio::test]
    async fn ingestion_executor_unknown_table_fails() {
        let store = store().await;
        let executor = IngestionExecutor::new(Arc::clone(&store), Arc::new(SnapshotCell::new()));
        let job = JobSpec::new(
            AgentKind::Ingestion,
            serde_json::json!({"table_name": "ghosts", "row_data": {}}),
        );
        assert!(executor.run(&job).await.is_err());
    }

    #[tokio::test]
    async fn cross_domain_executor_summarizes() {
        let store = store().await;
        store
            .insert(
                "memory_documents",
                &serde_json::json!({"title": "A", "file_path": "/a", "trust_score": 0.8}),
                false,
            )
            .await
            .unwrap();

        let executor = CrossDomainExecutor::new(Arc::clone(&store), 10, 1000);
        let job = JobSpec::new(
            AgentKind::CrossDomainLearning,
            serde_json::json!({"query_spec": {"tables": ["memory_documents"]}}),
        );
        let result = executor.run(&job).await.unwrap();
        assert_eq!(result["patterns"]["total_rows"], 1);
        assert_eq!(result["patterns"]["tables_queried"], 1);
        assert_eq!(result["results"]["memory_documents"]["row_count"], 1);
    }
}
