//! The agent kind factory.
//!
//! The lifecycle manager depends on this trait, not on the concrete
//! kinds, which breaks the lifecycle <-> agents cycle. The standard
//! factory wires each kind's manifest (mission, capabilities,
//! constraints) and executor the same way for every spawn.

use crate::kinds::{CrossDomainExecutor, IngestionExecutor, SchemaInferenceExecutor};
use crate::runtime::{AgentRuntime, AgentSpec};
use mnemon_governance::GovernanceClient;
use mnemon_protocol::AgentKind;
use mnemon_schema::TableStore;
use mnemon_trust::SnapshotCell;
use std::sync::Arc;

/// Constructs agents by kind.
pub trait AgentKindFactory: Send + Sync {
    fn build(&self, kind: AgentKind, instance_id: Option<String>) -> AgentRuntime;
}

/// The standard wiring for the three shipped kinds.
pub struct StandardAgentFactory {
    store: Arc<TableStore>,
    snapshot: Arc<SnapshotCell>,
    governance: Option<GovernanceClient>,
}

impl StandardAgentFactory {
    pub fn new(store: Arc<TableStore>, snapshot: Arc<SnapshotCell>) -> Self {
        Self {
            store,
            snapshot,
            governance: None,
        }
    }

    pub fn with_governance(mut self, governance: GovernanceClient) -> Self {
        self.governance = Some(governance);
        self
    }

    fn spec_for(kind: AgentKind) -> AgentSpec {
        match kind {
            AgentKind::SchemaInference => AgentSpec {
                kind,
                name: "Schema Inference Agent".into(),
                agent_type: "specialist".into(),
                mission: "Analyze files and infer optimal schema structure".into(),
                capabilities: vec![
                    "file_analysis".into(),
                    "content_extraction".into(),
                    "schema_inference".into(),
                    "field_extraction".into(),
                ],
                constraints: serde_json::json!({
                    "read_only": true,
                    "max_file_size_mb": 100,
                    "requires_approval": true,
                    "allowed_formats": [
                        "txt", "pdf", "md", "csv", "json", "yaml", "py", "js", "ts"
                    ],
                }),
            },
            AgentKind::Ingestion => AgentSpec {
                kind,
                name: "Ingestion Agent".into(),
                agent_type: "worker".into(),
                mission: "Ingest analyzed data into the memory tables".into(),
                capabilities: vec![
                    "table_insertion".into(),
                    "data_validation".into(),
                    "trust_computation".into(),
                    "contradiction_check".into(),
                ],
                constraints: serde_json::json!({
                    "requires_governance": true,
                    "auto_approve_threshold": 0.90,
                    "max_batch_size": 100,
                }),
            },
            AgentKind::CrossDomainLearning => AgentSpec {
                kind,
                name: "Cross-Domain Learning Agent".into(),
                agent_type: "specialist".into(),
                mission: "Extract patterns across multiple memory tables".into(),
                capabilities: vec![
                    "cross_table_query".into(),
                    "pattern_extraction".into(),
                    "insight_generation".into(),
                    "knowledge_synthesis".into(),
                ],
                constraints: serde_json::json!({
                    "read_only": true,
                    "max_tables": 10,
                    "max_rows_per_table": 1000,
                }),
            },
        }
    }
}

impl AgentKindFactory for StandardAgentFactory {
    fn build(&self, kind: AgentKind, instance_id: Option<String>) -> AgentRuntime {
        let spec = Self::spec_for(kind);

        let executor: Box<dyn crate::executor::JobExecutor> = match kind {
            AgentKind::SchemaInference => {
                let allowed = spec
                    .constraints
                    .get("allowed_formats")
                    .and_then(|v| v.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                let max_mb = spec
                    .constraints
                    .get("max_file_size_mb")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(100);
                Box::new(SchemaInferenceExecutor::new(
                    Arc::clone(self.store.registry()),
                    allowed,
                    max_mb,
                ))
            }
            AgentKind::Ingestion => Box::new(IngestionExecutor::new(
                Arc::clone(&self.store),
                Arc::clone(&self.snapshot),
            )),
            AgentKind::CrossDomainLearning => {
                let max_tables = spec
                    .constraints
                    .get("max_tables")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(10) as usize;
                let max_rows = spec
                    .constraints
                    .get("max_rows_per_table")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(1000) as u32;
                Box::new(CrossDomainExecutor::new(
                    Arc::clone(&self.store),
                    max_tables,
                    max_rows,
                ))
            }
        };

        let mut runtime =
            AgentRuntime::new(spec, instance_id, executor).with_store(Arc::clone(&self.store));
        if let Some(governance) = &self.governance {
            runtime = runtime.with_governance(governance.clone());
        }
        runtime
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemon_schema::builtin::register_builtins;
    use mnemon_schema::SchemaRegistry;

    async fn factory() -> StandardAgentFactory {
        let registry = Arc::new(SchemaRegistry::new("/nonexistent"));
        register_builtins(&registry).unwrap();
        let store = Arc::new(TableStore::in_memory(registry).await.unwrap());
        store.materialize().await.unwrap();
        StandardAgentFactory::new(store, Arc::new(SnapshotCell::new()))
    }

    #[tokio::test]
    async fn builds_all_kinds_with_kind_prefixed_ids() {
        let factory = factory().await;
        for kind in AgentKind::ALL {
            let agent = factory.build(*kind, None);
            assert_eq!(agent.kind(), *kind);
            assert!(agent.id().as_str().starts_with(kind.as_str()));
        }
    }

    #[tokio::test]
    async fn instance_id_is_honored() {
        let factory = factory().await;
        let agent = factory.build(AgentKind::Ingestion, Some("ingestion_fixed001".into()));
        assert_eq!(agent.id().as_str(), "ingestion_fixed001");
    }

    #[tokio::test]
    async fn specialists_start_more_trusted_than_workers() {
        let factory = factory().await;
        let specialist = factory.build(AgentKind::SchemaInference, None);
        let worker = factory.build(AgentKind::Ingestion, None);
        assert!(specialist.trust_score() > worker.trust_score());
    }

    #[tokio::test]
    async fn agent_registers_schema_entry_on_initialize() {
        let registry = Arc::new(SchemaRegistry::new("/nonexistent"));
        register_builtins(&registry).unwrap();
        let store = Arc::new(TableStore::in_memory(registry).await.unwrap());
        store.materialize().await.unwrap();
        let factory =
            StandardAgentFactory::new(Arc::clone(&store), Arc::new(SnapshotCell::new()));

        let agent = factory.build(AgentKind::Ingestion, None);
        agent.initialize().await;

        let entry = store
            .find_by_fingerprint("memory_sub_agents", agent.id().as_str())
            .await
            .unwrap()
            .expect("schema entry");
        assert_eq!(entry.get_str("status"), Some("idle"));
        assert_eq!(entry.get_str("agent_type"), Some("worker"));
    }
}
