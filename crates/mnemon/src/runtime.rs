//! The composition root.
//!
//! Builds each subsystem exactly once and wires the handles. The
//! original design goal: no cross-module singletons - anything that
//! needs a subsystem receives its `Arc` here.

use crate::config::Config;
use anyhow::{Context, Result};
use mnemon_agents::StandardAgentFactory;
use mnemon_alerts::AlertSystem;
use mnemon_governance::{Gateway, GovernanceClient, PolicyGateway};
use mnemon_ingest::{IngestConfig, IngestionPipeline};
use mnemon_lifecycle::LifecycleManager;
use mnemon_protocol::EventBus;
use mnemon_schema::{builtin, SchemaRegistry, TableStore};
use mnemon_training::{default_policies, TrainingTrigger};
use mnemon_trust::{ContradictionDetector, RulePack, SnapshotCell, TrustEngine};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Every long-lived subsystem, built once.
pub struct Subsystems {
    pub config: Config,
    pub registry: Arc<SchemaRegistry>,
    pub store: Arc<TableStore>,
    pub events: EventBus,
    pub gateway: Arc<PolicyGateway>,
    pub governance: GovernanceClient,
    pub snapshot: Arc<SnapshotCell>,
    pub detector: Arc<ContradictionDetector>,
    pub trust: Arc<TrustEngine>,
    pub alerts: Arc<AlertSystem>,
    pub training: Arc<TrainingTrigger>,
    pub lifecycle: Arc<LifecycleManager>,
    pub pipeline: Arc<IngestionPipeline>,
}

/// Build the full control plane from configuration.
pub async fn build(config: Config) -> Result<Subsystems> {
    // Schema definitions: seed the built-ins, then load the directory.
    builtin::write_builtin_schemas(&config.schema_dir)
        .with_context(|| format!("Failed to seed schemas in {}", config.schema_dir.display()))?;
    let registry = Arc::new(SchemaRegistry::new(&config.schema_dir));
    let loaded = registry.load_all();
    info!("Loaded {} table schemas", loaded);

    // Storage: one SQLite file, created on first run.
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let options = SqliteConnectOptions::new()
        .filename(&config.database_path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| {
            format!(
                "Failed to open database {}",
                config.database_path.display()
            )
        })?;
    let store = Arc::new(TableStore::new(pool.clone(), Arc::clone(&registry)));
    store.materialize().await.context("Schema materialization failed")?;

    let events = EventBus::new();

    // Governance: the local policy gateway behind the normalizing client.
    let gateway = Arc::new(PolicyGateway::new(config.medium_confidence_floor));
    let gateway_handle: Arc<dyn Gateway> = gateway.clone();
    let governance = GovernanceClient::new(gateway_handle)
        .with_timeout(Duration::from_secs(config.gateway_timeout_seconds));

    // Trust and contradictions share the snapshot cell.
    let snapshot = Arc::new(SnapshotCell::new());
    let detector = Arc::new(ContradictionDetector::new(
        Arc::clone(&store),
        RulePack::builtin(),
    ));
    let trust = Arc::new(TrustEngine::new(Arc::clone(&store)));

    let alerts = Arc::new(AlertSystem::new(
        Arc::clone(&store),
        Arc::clone(&trust),
        Arc::clone(&detector),
    ));

    let training = Arc::new(
        TrainingTrigger::new(pool, default_policies(), Arc::new(events.clone()))
            .with_governance(governance.clone()),
    );
    training.init().await.context("Training counter init failed")?;

    let factory = StandardAgentFactory::new(Arc::clone(&store), Arc::clone(&snapshot))
        .with_governance(governance.clone());
    let lifecycle = Arc::new(
        LifecycleManager::new(
            Arc::new(factory),
            config.lifecycle.clone(),
            Arc::new(events.clone()),
        )
        .with_governance(governance.clone()),
    );

    let ingest_config = IngestConfig {
        watch_folders: config.watch_folders.clone(),
        scan_interval_seconds: config.scan_interval_seconds,
        approval_interval_seconds: config.approval_interval_seconds,
        stale_pending_hours: config.stale_pending_hours,
        ..Default::default()
    };
    let pipeline = Arc::new(IngestionPipeline::new(
        ingest_config,
        Arc::clone(&store),
        governance.clone(),
        Arc::clone(&lifecycle),
        Arc::clone(&training),
        Arc::new(events.clone()),
    ));

    Ok(Subsystems {
        config,
        registry,
        store,
        events,
        gateway,
        governance,
        snapshot,
        detector,
        trust,
        alerts,
        training,
        lifecycle,
        pipeline,
    })
}

impl Subsystems {
    /// Start every background loop.
    pub fn start_all(&self) {
        self.lifecycle.start_monitoring();
        self.alerts
            .start_monitoring(Duration::from_secs(self.config.alert_interval_seconds));
        self.pipeline.start(None);
        info!("All background loops started");
    }

    /// Stop every background loop, waiting for each to exit.
    pub async fn stop_all(&self) {
        self.pipeline.stop().await;
        self.alerts.stop_monitoring().await;
        self.lifecycle.stop_monitoring().await;
        info!("All background loops stopped");
    }

    /// Run a contradiction pass and publish it as the snapshot trust
    /// scoring reads from.
    pub async fn refresh_contradictions(&self) -> mnemon_schema::Result<usize> {
        let snapshot = self.detector.scan_all(1000).await?;
        let count = snapshot.len();
        self.snapshot.set(snapshot);
        Ok(count)
    }
}
