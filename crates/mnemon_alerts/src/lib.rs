//! Alerting over the memory store.
//!
//! Alert identity is deterministic from `(source, condition key)`: when
//! the same condition is observed again, the existing alert's
//! `last_seen_at` and metadata are updated and `first_seen_at` is
//! preserved - a recurring condition is one alert, not a stream of them.
//!
//! The monitor runs one `check` pass per tick over trust, contradiction
//! and table-health conditions; errors inside the loop are logged and
//! swallowed, never fatal.

use chrono::{DateTime, Utc};
use mnemon_protocol::{AlertSeverity, ShutdownToken};
use mnemon_schema::{builtin, QueryOptions, TableStore};
use mnemon_trust::{ContradictionDetector, TrustEngine, LOW_TRUST_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Bound on the alert history ring.
const MAX_HISTORY: usize = 1000;

/// Total-contradiction count above which a warning fires.
const CONTRADICTION_WARNING_THRESHOLD: usize = 50;

/// Ratio of low-trust rows above which a warning fires.
const LOW_TRUST_RATIO_THRESHOLD: f64 = 0.3;

/// An active or historical alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub severity: AlertSeverity,
    pub source: String,
    pub title: String,
    pub message: String,
    pub metadata: serde_json::Value,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub resolved: bool,
}

/// Summary counts over active alerts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertSummary {
    pub total_active: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
    pub critical_count: usize,
    pub needs_attention: usize,
}

/// The alert system: active map, history ring, condition checks.
pub struct AlertSystem {
    store: Arc<TableStore>,
    trust: Arc<TrustEngine>,
    detector: Arc<ContradictionDetector>,
    active: Mutex<HashMap<String, Alert>>,
    history: Mutex<VecDeque<Alert>>,
    monitor: Mutex<Option<MonitorHandle>>,
}

struct MonitorHandle {
    token: ShutdownToken,
    task: tokio::task::JoinHandle<()>,
}

impl AlertSystem {
    pub fn new(
        store: Arc<TableStore>,
        trust: Arc<TrustEngine>,
        detector: Arc<ContradictionDetector>,
    ) -> Self {
        Self {
            store,
            trust,
            detector,
            active: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            monitor: Mutex::new(None),
        }
    }

    /// One pass over all alert conditions.
    pub async fn check(&self) {
        if let Err(e) = self.check_trust().await {
            error!("Trust condition check failed: {}", e);
        }
        if let Err(e) = self.check_contradictions().await {
            error!("Contradiction condition check failed: {}", e);
        }
        self.check_table_health().await;
    }

    async fn check_trust(&self) -> mnemon_schema::Result<()> {
        let report = self.trust.report().await?;

        for (table, stats) in &report.tables {
            if stats.avg_trust < LOW_TRUST_THRESHOLD {
                self.raise(
                    format!("low_trust_{}", table),
                    AlertSeverity::Warning,
                    "trust_monitoring",
                    format!("Low Trust Score: {}", table),
                    format!(
                        "Average trust score is {:.0}% (threshold: 50%)",
                        stats.avg_trust * 100.0
                    ),
                    serde_json::json!({
                        "table": table,
                        "avg_trust": stats.avg_trust,
                        "low_trust_rows": stats.low_trust_count,
                        "total_rows": stats.total_rows,
                    }),
                );
            } else if stats.total_rows > 0
                && stats.low_trust_count as f64 / stats.total_rows as f64
                    > LOW_TRUST_RATIO_THRESHOLD
            {
                self.raise(
                    format!("high_low_trust_ratio_{}", table),
                    AlertSeverity::Warning,
                    "trust_monitoring",
                    format!("High Low-Trust Ratio: {}", table),
                    format!(
                        "{}/{} rows have low trust",
                        stats.low_trust_count, stats.total_rows
                    ),
                    serde_json::json!({
                        "table": table,
                        "low_trust_count": stats.low_trust_count,
                        "total_rows": stats.total_rows,
                    }),
                );
            }
        }

        Ok(())
    }

    async fn check_contradictions(&self) -> mnemon_schema::Result<()> {
        let snapshot = self.detector.scan_all(1000).await?;
        let summary = ContradictionDetector::summarize(&snapshot);

        if summary.critical_count > 0 {
            self.raise(
                "critical_contradictions".to_string(),
                AlertSeverity::Critical,
                "contradiction_detection",
                format!("{} Critical Contradictions Detected", summary.critical_count),
                format!(
                    "Found {} critical contradictions that require immediate attention",
                    summary.critical_count
                ),
                serde_json::json!({
                    "critical_count": summary.critical_count,
                    "total_contradictions": summary.total,
                    "by_severity": summary.by_severity,
                    "by_table": summary.by_table,
                }),
            );
        } else if summary.total > CONTRADICTION_WARNING_THRESHOLD {
            self.raise(
                "high_contradiction_count".to_string(),
                AlertSeverity::Warning,
                "contradiction_detection",
                format!("{} Contradictions Detected", summary.total),
                "High number of contradictions detected across tables".to_string(),
                serde_json::json!({
                    "total_contradictions": summary.total,
                    "by_table": summary.by_table,
                }),
            );
        }

        Ok(())
    }

    async fn check_table_health(&self) {
        for table in self.store.registry().list() {
            match self
                .store
                .query(&table, QueryOptions::default().with_limit(1))
                .await
            {
                Ok(rows) => {
                    if rows.is_empty() && builtin::CRITICAL_TABLES.contains(&table.as_str()) {
                        self.raise(
                            format!("empty_table_{}", table),
                            AlertSeverity::Info,
                            "table_health",
                            format!("Empty Table: {}", table),
                            format!("Critical table {} has no data", table),
                            serde_json::json!({"table": table}),
                        );
                    }
                }
                Err(e) => {
                    self.raise(
                        format!("table_error_{}", table),
                        AlertSeverity::Error,
                        "table_health",
                        format!("Table Access Error: {}", table),
                        format!("Error accessing table: {}", e),
                        serde_json::json!({"table": table, "error": e.to_string()}),
                    );
                }
            }
        }
    }

    /// Create or refresh an alert. The id is the deterministic identity:
    /// re-raising updates `last_seen_at` and metadata in place.
    pub fn raise(
        &self,
        id: String,
        severity: AlertSeverity,
        source: &str,
        title: String,
        message: String,
        metadata: serde_json::Value,
    ) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = active.get_mut(&id) {
            existing.last_seen_at = Utc::now();
            existing.message = message;
            merge_metadata(&mut existing.metadata, metadata);
            return;
        }

        let now = Utc::now();
        let alert = Alert {
            id: id.clone(),
            severity,
            source: source.to_string(),
            title: title.clone(),
            message,
            metadata,
            first_seen_at: now,
            last_seen_at: now,
            acknowledged: false,
            resolved: false,
        };

        warn!("NEW ALERT [{}]: {}", severity.as_str().to_uppercase(), title);
        active.insert(id, alert.clone());

        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push_back(alert);
        while history.len() > MAX_HISTORY {
            history.pop_front();
        }
    }

    /// Active alerts, optionally filtered, most severe then most recent.
    pub fn active(&self, severity: Option<AlertSeverity>) -> Vec<Alert> {
        let guard = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let mut alerts: Vec<Alert> = guard
            .values()
            .filter(|a| severity.map(|s| a.severity == s).unwrap_or(true))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| {
            a.severity
                .rank()
                .cmp(&b.severity.rank())
                .then(b.last_seen_at.cmp(&a.last_seen_at))
        });
        alerts
    }

    /// Acknowledge an active alert. Idempotent; `false` for unknown ids.
    pub fn acknowledge(&self, id: &str) -> bool {
        let mut guard = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match guard.get_mut(id) {
            Some(alert) => {
                alert.acknowledged = true;
                info!("Alert acknowledged: {}", id);
                true
            }
            None => false,
        }
    }

    /// Resolve an alert, removing it from the active map.
    pub fn resolve(&self, id: &str) -> bool {
        let mut guard = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match guard.remove(id) {
            Some(mut alert) => {
                alert.resolved = true;
                alert.acknowledged = true;
                info!("Alert resolved: {}", id);
                true
            }
            None => false,
        }
    }

    pub fn summary(&self) -> AlertSummary {
        let guard = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let mut summary = AlertSummary {
            total_active: guard.len(),
            ..Default::default()
        };
        for alert in guard.values() {
            *summary
                .by_severity
                .entry(alert.severity.as_str().to_string())
                .or_insert(0) += 1;
            *summary.by_source.entry(alert.source.clone()).or_insert(0) += 1;
        }
        summary.critical_count = *summary.by_severity.get("critical").unwrap_or(&0);
        summary.needs_attention =
            summary.critical_count + *summary.by_severity.get("error").unwrap_or(&0);
        summary
    }

    pub fn history(&self) -> Vec<Alert> {
        let guard = self.history.lock().unwrap_or_else(|e| e.into_inner());
        guard.iter().cloned().collect()
    }

    /// Start the periodic monitor. No-op if already running.
    pub fn start_monitoring(self: &Arc<Self>, interval: Duration) {
        let mut guard = self.monitor.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            return;
        }

        let token = ShutdownToken::new();
        let loop_token = token.clone();
        let system = Arc::clone(self);
        let task = tokio::spawn(async move {
            info!("Alert monitoring started (interval: {:?})", interval);
            loop {
                system.check().await;
                if loop_token.sleep(interval).await {
                    break;
                }
            }
            info!("Alert monitoring stopped");
        });

        *guard = Some(MonitorHandle { token, task });
    }

    /// Stop the monitor, waiting for the loop to observe cancellation.
    pub async fn stop_monitoring(&self) {
        let handle = {
            let mut guard = self.monitor.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        if let Some(handle) = handle {
            handle.token.cancel();
            let _ = handle.task.await;
        }
    }

    pub fn is_monitoring(&self) -> bool {
        let guard = self.monitor.lock().unwrap_or_else(|e| e.into_inner());
        guard.is_some()
    }
}

fn merge_metadata(existing: &mut serde_json::Value, incoming: serde_json::Value) {
    match (existing.as_object_mut(), incoming) {
        (Some(map), serde_json::Value::Object(new)) => {
            for (k, v) in new {
                map.insert(k, v);
            }
        }
        (_, incoming) => *existing = incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemon_schema::builtin::register_builtins;
    use mnemon_schema::SchemaRegistry;
    use mnemon_trust::RulePack;

    async fn system() -> Arc<AlertSystem> {
        let registry = Arc::new(SchemaRegistry::new("/nonexistent"));
        register_builtins(&registry).unwrap();
        let store = Arc::new(TableStore::in_memory(registry).await.unwrap());
        store.materialize().await.unwrap();

        let trust = Arc::new(TrustEngine::new(Arc::clone(&store)));
        let detector = Arc::new(ContradictionDetector::new(
            Arc::clone(&store),
            RulePack::builtin(),
        ));
        Arc::new(AlertSystem::new(store, trust, detector))
    }

    #[tokio::test]
    async fn same_condition_updates_not_duplicates() {
        let system = system().await;
        system.raise(
            "low_trust_memory_documents".into(),
            AlertSeverity::Warning,
            "trust_monitoring",
            "Low Trust".into(),
            "first".into(),
            serde_json::json!({"pass": 1}),
        );
        let first_seen = system.active(None)[0].first_seen_at;

        tokio::time::sleep(Duration::from_millis(5)).await;
        system.raise(
            "low_trust_memory_documents".into(),
            AlertSeverity::Warning,
            "trust_monitoring",
            "Low Trust".into(),
            "second".into(),
            serde_json::json!({"pass": 2}),
        );

        let active = system.active(None);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].first_seen_at, first_seen);
        assert!(active[0].last_seen_at > first_seen);
        assert_eq!(active[0].message, "second");
        assert_eq!(active[0].metadata["pass"], 2);
    }

    #[tokio::test]
    async fn acknowledge_is_idempotent() {
        let system = system().await;
        system.raise(
            "a1".into(),
            AlertSeverity::Info,
            "test",
            "t".into(),
            "m".into(),
            serde_json::json!({}),
        );

        assert!(system.acknowledge("a1"));
        assert!(system.acknowledge("a1"));
        assert!(system.active(None)[0].acknowledged);
        assert!(!system.acknowledge("ghost"));
    }

    #[tokio::test]
    async fn resolve_removes_from_active() {
        let system = system().await;
        system.raise(
            "a1".into(),
            AlertSeverity::Error,
            "test",
            "t".into(),
            "m".into(),
            serde_json::json!({}),
        );
        assert!(system.resolve("a1"));
        assert!(system.active(None).is_empty());
        assert!(!system.resolve("a1"));
        // History keeps the record.
        assert_eq!(system.history().len(), 1);
    }

    #[tokio::test]
    async fn active_sorted_by_severity_then_recency() {
        let system = system().await;
        for (id, severity) in [
            ("w", AlertSeverity::Warning),
            ("c", AlertSeverity::Critical),
            ("i", AlertSeverity::Info),
            ("e", AlertSeverity::Error),
        ] {
            system.raise(
                id.into(),
                severity,
                "test",
                id.into(),
                "m".into(),
                serde_json::json!({}),
            );
        }
        let active = system.active(None);
        let ids: Vec<&str> = active.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "e", "w", "i"]);

        let errors = system.active(Some(AlertSeverity::Error));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].id, "e");
    }

    #[tokio::test]
    async fn check_raises_empty_critical_table_info() {
        let system = system().await;
        system.check().await;

        let active = system.active(None);
        assert!(active
            .iter()
            .any(|a| a.id == "empty_table_memory_documents" && a.severity == AlertSeverity::Info));
    }

    #[tokio::test]
    async fn check_raises_critical_contradiction_alert() {
        let system = system().await;
        for (name, actions) in [("a", vec!["x"]), ("b", vec!["y"])] {
            system
                .store
                .insert(
                    "memory_playbooks",
                    &serde_json::json!({
                        "playbook_name": name,
                        "trigger_conditions": {"signal": "oom"},
                        "actions": actions,
                    }),
                    false,
                )
                .await
                .unwrap();
        }

        system.check().await;
        let critical = system.active(Some(AlertSeverity::Critical));
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].id, "critical_contradictions");
    }

    #[tokio::test]
    async fn summary_counts() {
        let system = system().await;
        system.raise(
            "c1".into(),
            AlertSeverity::Critical,
            "x",
            "t".into(),
            "m".into(),
            serde_json::json!({}),
        );
        system.raise(
            "e1".into(),
            AlertSeverity::Error,
            "y",
            "t".into(),
            "m".into(),
            serde_json::json!({}),
        );

        let summary = system.summary();
        assert_eq!(summary.total_active, 2);
        assert_eq!(summary.critical_count, 1);
        assert_eq!(summary.needs_attention, 2);
    }

    #[tokio::test]
    async fn monitor_start_stop() {
        let system = system().await;
        system.start_monitoring(Duration::from_millis(10));
        assert!(system.is_monitoring());
        // Starting again is a no-op.
        system.start_monitoring(Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(30)).await;
        system.stop_monitoring().await;
        assert!(!system.is_monitoring());
    }
}
