//! Row trust scoring.
//!
//! Trust is a weighted sum of five factors, each in [0, 1]:
//!
//! | factor       | weight | signal                                        |
//! |--------------|--------|-----------------------------------------------|
//! | completeness | 0.30   | required fields filled (0.6) + optional (0.4) |
//! | source       | 0.25   | governance stamp, then creator identity       |
//! | freshness    | 0.15   | piecewise-linear age decay, floor 0.30        |
//! | usage        | 0.20   | success rate plus a capped usage boost        |
//! | consistency  | 0.10   | 1 minus contradiction penalties, floor 0      |
//!
//! Scoring is pure over the row plus a contradiction snapshot taken by a
//! *previous* detection pass. Results are clamped; NaN is never persisted.

use crate::contradiction::ContradictionSnapshot;
use chrono::{DateTime, Utc};
use mnemon_schema::{QueryOptions, Row, TableSchema, TableStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub const LOW_TRUST_THRESHOLD: f64 = 0.5;
pub const HIGH_TRUST_THRESHOLD: f64 = 0.8;

const WEIGHT_COMPLETENESS: f64 = 0.30;
const WEIGHT_SOURCE: f64 = 0.25;
const WEIGHT_FRESHNESS: f64 = 0.15;
const WEIGHT_USAGE: f64 = 0.20;
const WEIGHT_CONSISTENCY: f64 = 0.10;

/// Freshness breakpoints: (age in days, score). Linear between points,
/// 0.30 floor past the last one.
const FRESHNESS_CURVE: &[(f64, f64)] = &[
    (0.0, 1.0),
    (1.0, 1.0),
    (7.0, 0.95),
    (30.0, 0.85),
    (90.0, 0.70),
    (180.0, 0.50),
];
const FRESHNESS_FLOOR: f64 = 0.30;

/// Per-table stats in a trust report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustTableStats {
    pub avg_trust: f64,
    pub low_trust_count: usize,
    pub high_trust_count: usize,
    pub total_rows: usize,
}

/// Trust report across all tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustReport {
    pub tables: BTreeMap<String, TrustTableStats>,
    pub overall: TrustTableStats,
    pub generated_at: Option<DateTime<Utc>>,
}

/// The trust engine.
pub struct TrustEngine {
    store: Arc<TableStore>,
}

impl TrustEngine {
    pub fn new(store: Arc<TableStore>) -> Self {
        Self { store }
    }

    /// Pure scoring of one row against a contradiction snapshot.
    pub fn score(schema: &TableSchema, row: &Row, snapshot: &ContradictionSnapshot) -> f64 {
        let completeness = score_completeness(schema, row);
        let source = score_source(row);
        let freshness = score_freshness(row);
        let usage = score_usage(row);
        let consistency = score_consistency(row, snapshot);

        let trust = completeness * WEIGHT_COMPLETENESS
            + source * WEIGHT_SOURCE
            + freshness * WEIGHT_FRESHNESS
            + usage * WEIGHT_USAGE
            + consistency * WEIGHT_CONSISTENCY;

        debug!(
            "Trust for {} row {:?}: {:.3} (completeness={:.2} source={:.2} freshness={:.2} usage={:.2} consistency={:.2})",
            schema.table_name,
            row.id(),
            trust,
            completeness,
            source,
            freshness,
            usage,
            consistency
        );

        clamp(trust)
    }

    /// Rescore up to `limit` rows of a table, persisting `trust_score`.
    /// Returns the number of rows updated.
    pub async fn rescore(
        &self,
        table: &str,
        limit: u32,
        snapshot: &ContradictionSnapshot,
    ) -> mnemon_schema::Result<usize> {
        let schema = self.store.registry().require(table)?;
        let rows = self
            .store
            .query(table, QueryOptions::default().with_limit(limit))
            .await?;

        let mut updated = 0;
        for row in rows {
            let Some(id) = row.id() else { continue };
            let trust = Self::score(&schema, &row, snapshot);
            match self
                .store
                .update(table, &id, &serde_json::json!({ "trust_score": trust }))
                .await
            {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!("Failed to persist trust for {} row {}: {}", table, id, e);
                }
            }
        }

        info!("Updated {} trust scores in {}", updated, table);
        Ok(updated)
    }

    /// Trust report over all registered tables.
    pub async fn report(&self) -> mnemon_schema::Result<TrustReport> {
        let mut report = TrustReport {
            generated_at: Some(Utc::now()),
            ..Default::default()
        };
        let mut all_scores: Vec<f64> = Vec::new();

        for table in self.store.registry().list() {
            let rows = self
                .store
                .query(&table, QueryOptions::default().with_limit(1000))
                .await?;
            if rows.is_empty() {
                continue;
            }

            let scores: Vec<f64> = rows.iter().map(Row::trust_score).collect();
            let stats = TrustTableStats {
                avg_trust: scores.iter().sum::<f64>() / scores.len() as f64,
                low_trust_count: scores.iter().filter(|t| **t < LOW_TRUST_THRESHOLD).count(),
                high_trust_count: scores.iter().filter(|t| **t >= HIGH_TRUST_THRESHOLD).count(),
                total_rows: scores.len(),
            };
            report.tables.insert(table, stats);
            all_scores.extend(scores);
        }

        if !all_scores.is_empty() {
            report.overall = TrustTableStats {
                avg_trust: all_scores.iter().sum::<f64>() / all_scores.len() as f64,
                low_trust_count: all_scores.iter().filter(|t| **t < LOW_TRUST_THRESHOLD).count(),
                high_trust_count: all_scores
                    .iter()
                    .filter(|t| **t >= HIGH_TRUST_THRESHOLD)
                    .count(),
                total_rows: all_scores.len(),
            };
        }

        Ok(report)
    }
}

fn clamp(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Completeness: required fields filled weighted 0.6, optional 0.4.
fn score_completeness(schema: &TableSchema, row: &Row) -> f64 {
    let mut required_total = 0usize;
    let mut required_filled = 0usize;
    let mut optional_total = 0usize;
    let mut optional_filled = 0usize;

    for field in &schema.fields {
        let filled = row.get(&field.name).map(|v| !v.is_empty()).unwrap_or(false);
        if field.required {
            required_total += 1;
            if filled {
                required_filled += 1;
            }
        } else {
            optional_total += 1;
            if filled {
                optional_filled += 1;
            }
        }
    }

    let required_score = if required_total > 0 {
        required_filled as f64 / required_total as f64
    } else {
        1.0
    };
    let optional_score = if optional_total > 0 {
        optional_filled as f64 / optional_total as f64
    } else {
        0.5
    };

    required_score * 0.6 + optional_score * 0.4
}

/// Source reliability: governance stamp first, then creator identity.
fn score_source(row: &Row) -> f64 {
    if let Some(stamp) = row.governance_stamp() {
        if stamp.get("approved").and_then(|v| v.as_bool()).unwrap_or(false) {
            return 0.9;
        }
        if stamp.get("verified").and_then(|v| v.as_bool()).unwrap_or(false) {
            return 0.85;
        }
        return 0.7;
    }

    match row.get_str("created_by") {
        Some("grace") => 0.85,
        Some("self_healing_subsystem") => 0.80,
        Some("coding_agent") => 0.75,
        Some("schema_proposal_engine") => 0.75,
        Some("auto_ingestion") => 0.75,
        Some("sub_agents") => 0.70,
        Some("user") => 0.60,
        Some("external") => 0.50,
        _ => 0.50,
    }
}

/// Freshness: most recent lifecycle timestamp, piecewise-linear decay.
fn score_freshness(row: &Row) -> f64 {
    let timestamp = row
        .get_datetime("updated_at")
        .or_else(|| row.get_datetime("last_used_at"))
        .or_else(|| row.get_datetime("last_active_at"))
        .or_else(|| row.created_at());

    let Some(timestamp) = timestamp else {
        return 0.5;
    };

    let age_days = (Utc::now() - timestamp).num_seconds().max(0) as f64 / 86_400.0;
    freshness_at(age_days)
}

fn freshness_at(age_days: f64) -> f64 {
    let mut previous = FRESHNESS_CURVE[0];
    if age_days <= previous.0 {
        return previous.1;
    }
    for point in &FRESHNESS_CURVE[1..] {
        if age_days <= point.0 {
            let span = point.0 - previous.0;
            let frac = if span > 0.0 { (age_days - previous.0) / span } else { 1.0 };
            return previous.1 + (point.1 - previous.1) * frac;
        }
        previous = *point;
    }
    FRESHNESS_FLOOR
}

/// Usage success: per-row success rate plus a capped usage boost.
fn score_usage(row: &Row) -> f64 {
    // Playbooks track success_rate / total_runs.
    if let Some(success_rate) = row.get_f64("success_rate") {
        let total_runs = row.get_i64("total_runs").unwrap_or(0);
        if total_runs == 0 {
            return 0.5;
        }
        let boost = (total_runs as f64 / 100.0).min(0.2);
        return (success_rate + boost).min(1.0);
    }

    // Agent rows track task counters.
    if let Some(completed) = row.get_i64("tasks_completed") {
        let failed = row.get_i64("tasks_failed").unwrap_or(0);
        let total = completed + failed;
        if total == 0 {
            return 0.5;
        }
        let success_rate = completed as f64 / total as f64;
        let boost = (total as f64 / 50.0).min(0.15);
        return (success_rate + boost).min(1.0);
    }

    // Documents and everything else: neutral-positive until usage
    // tracking exists for them.
    0.6
}

/// Consistency: 1.0 minus per-severity penalties for contradictions that
/// involve this row, floored at zero.
fn score_consistency(row: &Row, snapshot: &ContradictionSnapshot) -> f64 {
    let Some(id) = row.id() else {
        return 1.0;
    };
    let penalty: f64 = snapshot
        .involving(&id)
        .map(|r| r.severity.trust_penalty())
        .sum();
    (1.0 - penalty).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contradiction::ContradictionRecord;
    use mnemon_protocol::ContradictionSeverity;
    use mnemon_schema::builtin::register_builtins;
    use mnemon_schema::SchemaRegistry;
    use uuid::Uuid;

    async fn store() -> Arc<TableStore> {
        let registry = Arc::new(SchemaRegistry::new("/nonexistent"));
        register_builtins(&registry).unwrap();
        let store = Arc::new(TableStore::in_memory(registry).await.unwrap());
        store.materialize().await.unwrap();
        store
    }

    fn snapshot_with(row_id: &str, severity: ContradictionSeverity) -> ContradictionSnapshot {
        ContradictionSnapshot::new(vec![ContradictionRecord {
            id: Uuid::new_v4(),
            rule_name: "duplicate_content".into(),
            table: "memory_documents".into(),
            severity,
            row_ids: vec![row_id.to_string()],
            details: String::new(),
            detected_at: Utc::now(),
        }])
    }

    #[test]
    fn freshness_curve_interpolates() {
        assert_eq!(freshness_at(0.0), 1.0);
        assert_eq!(freshness_at(1.0), 1.0);
        assert!((freshness_at(7.0) - 0.95).abs() < 1e-9);
        // Midway between 7d (0.95) and 30d (0.85).
        let mid = freshness_at(18.5);
        assert!(mid < 0.95 && mid > 0.85);
        assert!((freshness_at(180.0) - 0.50).abs() < 1e-9);
        assert_eq!(freshness_at(400.0), FRESHNESS_FLOOR);
    }

    #[tokio::test]
    async fn fresh_complete_row_scores_above_half() {
        let store = store().await;
        let row = store
            .insert(
                "memory_documents",
                &serde_json::json!({
                    "title": "Alpha",
                    "summary": "a real summary",
                    "file_path": "/a",
                    "created_by": "auto_ingestion",
                    "token_count": 2,
                }),
                false,
            )
            .await
            .unwrap();
        let schema = store.registry().require("memory_documents").unwrap();

        let trust = TrustEngine::score(&schema, &row, &ContradictionSnapshot::default());
        assert!(trust > 0.5 && trust <= 1.0, "trust was {trust}");
    }

    #[tokio::test]
    async fn contradiction_drops_score_by_severity_penalty() {
        let store = store().await;
        let row = store
            .insert(
                "memory_documents",
                &serde_json::json!({
                    "title": "Alpha",
                    "file_path": "/a",
                }),
                false,
            )
            .await
            .unwrap();
        let schema = store.registry().require("memory_documents").unwrap();
        let id = row.id().unwrap();

        let clean = TrustEngine::score(&schema, &row, &ContradictionSnapshot::default());
        let dirty = TrustEngine::score(
            &schema,
            &row,
            &snapshot_with(&id, ContradictionSeverity::Medium),
        );

        // A medium contradiction costs 0.15 on the consistency factor,
        // weighted 0.10: 0.015 total; critical costs 0.05.
        assert!((clean - dirty - 0.15 * WEIGHT_CONSISTENCY).abs() < 1e-9);

        let critical = TrustEngine::score(
            &schema,
            &row,
            &snapshot_with(&id, ContradictionSeverity::Critical),
        );
        assert!(critical < dirty);
    }

    #[tokio::test]
    async fn governance_stamp_beats_created_by() {
        let store = store().await;
        let row = store
            .insert(
                "memory_documents",
                &serde_json::json!({
                    "title": "Alpha",
                    "file_path": "/a",
                    "created_by": "external",
                    "governance_stamp": {"approved": true},
                }),
                false,
            )
            .await
            .unwrap();
        assert_eq!(score_source(&row), 0.9);
    }

    #[tokio::test]
    async fn playbook_usage_boost_caps() {
        let store = store().await;
        let row = store
            .insert(
                "memory_playbooks",
                &serde_json::json!({
                    "playbook_name": "restart",
                    "success_rate": 0.9,
                    "total_runs": 500,
                }),
                false,
            )
            .await
            .unwrap();
        // Boost caps at +0.2 and the sum at 1.0.
        assert_eq!(score_usage(&row), 1.0);

        let untested = store
            .insert(
                "memory_playbooks",
                &serde_json::json!({"playbook_name": "fresh"}),
                false,
            )
            .await
            .unwrap();
        assert_eq!(score_usage(&untested), 0.5);
    }

    #[tokio::test]
    async fn rescore_persists_and_counts() {
        let store = store().await;
        for i in 0..3 {
            store
                .insert(
                    "memory_documents",
                    &serde_json::json!({
                        "title": format!("Doc {i}"),
                        "file_path": format!("/doc{i}"),
                    }),
                    false,
                )
                .await
                .unwrap();
        }

        let engine = TrustEngine::new(Arc::clone(&store));
        let updated = engine
            .rescore("memory_documents", 1000, &ContradictionSnapshot::default())
            .await
            .unwrap();
        assert_eq!(updated, 3);

        let rows = store
            .query("memory_documents", QueryOptions::default())
            .await
            .unwrap();
        for row in rows {
            let trust = row.trust_score();
            assert!((0.0..=1.0).contains(&trust));
            assert!(trust > 0.0);
        }
    }

    #[tokio::test]
    async fn rescore_empty_table_returns_zero() {
        let store = store().await;
        let engine = TrustEngine::new(Arc::clone(&store));
        let updated = engine
            .rescore("memory_documents", 1000, &ContradictionSnapshot::default())
            .await
            .unwrap();
        assert_eq!(updated, 0);
    }

    #[tokio::test]
    async fn report_skips_empty_tables() {
        let store = store().await;
        let engine = TrustEngine::new(Arc::clone(&store));
        let report = engine.report().await.unwrap();
        assert_eq!(report.overall.total_rows, 0);
        assert!(report.tables.is_empty());

        store
            .insert(
                "memory_documents",
                &serde_json::json!({"title": "A", "file_path": "/a", "trust_score": 0.9}),
                false,
            )
            .await
            .unwrap();
        let report = engine.report().await.unwrap();
        assert_eq!(report.overall.total_rows, 1);
        assert_eq!(report.tables["memory_documents"].high_trust_count, 1);
    }

    #[test]
    fn clamp_kills_nan() {
        assert_eq!(clamp(f64::NAN), 0.0);
        assert_eq!(clamp(2.0), 1.0);
        assert_eq!(clamp(-0.5), 0.0);
    }
}
