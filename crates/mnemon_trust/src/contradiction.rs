//! Cross-row contradiction detection.
//!
//! Rule packs are declared per table and loaded once at init. Three
//! methods exist:
//!
//! - `similarity`: Jaccard over whitespace-tokenized lowercased field
//!   values, averaged across the named fields, pairwise O(n²)
//! - `temporal_consistency`: rows grouped by an identifier field, flagged
//!   when a later-lifecycle timestamp precedes `created_at`
//! - `action_conflict`: rows grouped by trigger key, flagged when their
//!   action arrays differ
//!
//! Records are recomputed on demand from rows; nothing here persists.

use chrono::{DateTime, Utc};
use mnemon_protocol::ContradictionSeverity;
use mnemon_schema::{QueryOptions, Row, TableStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// How a rule compares rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleMethod {
    Similarity,
    TemporalConsistency,
    ActionConflict,
}

/// One declarative rule applied to one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRule {
    pub name: String,
    pub fields: Vec<String>,
    pub method: RuleMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    pub severity: ContradictionSeverity,
}

/// Rules grouped by table name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulePack {
    pub tables: BTreeMap<String, Vec<TableRule>>,
}

impl RulePack {
    /// The shipped rule set.
    pub fn builtin() -> Self {
        let mut tables = BTreeMap::new();
        tables.insert(
            "memory_documents".to_string(),
            vec![
                TableRule {
                    name: "duplicate_content".to_string(),
                    fields: vec!["title".to_string(), "summary".to_string()],
                    method: RuleMethod::Similarity,
                    threshold: Some(0.85),
                    severity: ContradictionSeverity::Medium,
                },
                TableRule {
                    name: "conflicting_dates".to_string(),
                    fields: vec!["created_at".to_string(), "file_path".to_string()],
                    method: RuleMethod::TemporalConsistency,
                    threshold: None,
                    severity: ContradictionSeverity::Low,
                },
            ],
        );
        tables.insert(
            "memory_codebases".to_string(),
            vec![TableRule {
                name: "duplicate_repo".to_string(),
                fields: vec!["repo_url".to_string(), "repo_name".to_string()],
                method: RuleMethod::Similarity,
                threshold: Some(0.95),
                severity: ContradictionSeverity::High,
            }],
        );
        tables.insert(
            "memory_playbooks".to_string(),
            vec![TableRule {
                name: "conflicting_actions".to_string(),
                fields: vec!["playbook_name".to_string(), "actions".to_string()],
                method: RuleMethod::ActionConflict,
                threshold: None,
                severity: ContradictionSeverity::Critical,
            }],
        );
        tables.insert(
            "memory_insights".to_string(),
            vec![TableRule {
                name: "duplicate_work".to_string(),
                fields: vec!["title".to_string(), "description".to_string()],
                method: RuleMethod::Similarity,
                threshold: Some(0.90),
                severity: ContradictionSeverity::Medium,
            }],
        );
        Self { tables }
    }

    /// Load a rule pack from YAML, replacing the built-ins.
    pub fn from_yaml(source: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(source)
    }

    pub fn rules_for(&self, table: &str) -> &[TableRule] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Evidence of inconsistency between rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContradictionRecord {
    pub id: Uuid,
    pub rule_name: String,
    pub table: String,
    pub severity: ContradictionSeverity,
    pub row_ids: Vec<String>,
    pub details: String,
    pub detected_at: DateTime<Utc>,
}

/// A completed detection pass, queryable by row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContradictionSnapshot {
    pub records: Vec<ContradictionRecord>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl ContradictionSnapshot {
    pub fn new(records: Vec<ContradictionRecord>) -> Self {
        Self {
            records,
            taken_at: Some(Utc::now()),
        }
    }

    /// Records that involve a given row id.
    pub fn involving<'a>(&'a self, row_id: &'a str) -> impl Iterator<Item = &'a ContradictionRecord> {
        self.records
            .iter()
            .filter(move |r| r.row_ids.iter().any(|id| id == row_id))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Summary counts across a full scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContradictionSummary {
    pub total: usize,
    pub by_table: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub critical_count: usize,
}

/// The contradiction detector. Rules load once at construction.
pub struct ContradictionDetector {
    store: Arc<TableStore>,
    rules: RulePack,
}

impl ContradictionDetector {
    pub fn new(store: Arc<TableStore>, rules: RulePack) -> Self {
        Self { store, rules }
    }

    pub fn with_builtin_rules(store: Arc<TableStore>) -> Self {
        Self::new(store, RulePack::builtin())
    }

    /// Detect contradictions in one table, reading at most `limit` rows.
    pub async fn detect(
        &self,
        table: &str,
        limit: u32,
    ) -> mnemon_schema::Result<Vec<ContradictionRecord>> {
        let rules = self.rules.rules_for(table);
        if rules.is_empty() {
            debug!("No contradiction rules for {}", table);
            return Ok(Vec::new());
        }

        let rows = self
            .store
            .query(table, QueryOptions::default().with_limit(limit))
            .await?;
        if rows.len() < 2 {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for rule in rules {
            match rule.method {
                RuleMethod::Similarity => {
                    records.extend(check_similarity(table, &rows, rule));
                }
                RuleMethod::TemporalConsistency => {
                    records.extend(check_temporal(table, &rows, rule));
                }
                RuleMethod::ActionConflict => {
                    records.extend(check_action_conflict(table, &rows, rule));
                }
            }
        }

        info!("Detected {} contradictions in {}", records.len(), table);
        Ok(records)
    }

    /// Scan every table that has rules, producing a fresh snapshot.
    pub async fn scan_all(&self, limit: u32) -> mnemon_schema::Result<ContradictionSnapshot> {
        let mut records = Vec::new();
        let tables: Vec<String> = self.rules.tables.keys().cloned().collect();
        for table in tables {
            if !self.store.registry().has(&table) {
                continue;
            }
            records.extend(self.detect(&table, limit).await?);
        }
        Ok(ContradictionSnapshot::new(records))
    }

    /// Summarize a snapshot.
    pub fn summarize(snapshot: &ContradictionSnapshot) -> ContradictionSummary {
        let mut summary = ContradictionSummary {
            total: snapshot.records.len(),
            ..Default::default()
        };
        for record in &snapshot.records {
            *summary.by_table.entry(record.table.clone()).or_insert(0) += 1;
            *summary
                .by_severity
                .entry(record.severity.as_str().to_string())
                .or_insert(0) += 1;
            if record.severity == ContradictionSeverity::Critical {
                summary.critical_count += 1;
            }
        }
        summary
    }
}

fn check_similarity(table: &str, rows: &[Row], rule: &TableRule) -> Vec<ContradictionRecord> {
    let threshold = rule.threshold.unwrap_or(0.85);
    let mut records = Vec::new();

    for (i, a) in rows.iter().enumerate() {
        for b in rows.iter().skip(i + 1) {
            let similarity = row_similarity(a, b, &rule.fields);
            if similarity >= threshold {
                let (Some(id_a), Some(id_b)) = (a.id(), b.id()) else {
                    continue;
                };
                records.push(ContradictionRecord {
                    id: Uuid::new_v4(),
                    rule_name: rule.name.clone(),
                    table: table.to_string(),
                    severity: rule.severity,
                    row_ids: vec![id_a, id_b],
                    details: format!(
                        "High similarity ({:.0}%) across fields [{}]",
                        similarity * 100.0,
                        rule.fields.join(", ")
                    ),
                    detected_at: Utc::now(),
                });
            }
        }
    }

    records
}

/// Mean Jaccard similarity over the named string fields.
fn row_similarity(a: &Row, b: &Row, fields: &[String]) -> f64 {
    let mut similarities = Vec::new();
    for field in fields {
        let (Some(va), Some(vb)) = (a.get_str(field), b.get_str(field)) else {
            continue;
        };
        similarities.push(jaccard(&va.to_lowercase(), &vb.to_lowercase()));
    }
    if similarities.is_empty() {
        0.0
    } else {
        similarities.iter().sum::<f64>() / similarities.len() as f64
    }
}

fn jaccard(a: &str, b: &str) -> f64 {
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    let union = words_a.union(&words_b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    intersection as f64 / union as f64
}

/// Timestamp fields that may legitimately trail `created_at`; any of them
/// observed *before* it is an impossible ordering.
const LIFECYCLE_FIELDS: &[&str] = &["updated_at", "last_used_at", "last_active_at"];

fn check_temporal(table: &str, rows: &[Row], rule: &TableRule) -> Vec<ContradictionRecord> {
    // fields = [date_field, identifier_field]
    let identifier_field = rule.fields.get(1).map(String::as_str).unwrap_or("id");
    let mut groups: HashMap<String, Vec<&Row>> = HashMap::new();
    for row in rows {
        let Some(identifier) = row.get_str(identifier_field) else {
            continue;
        };
        groups.entry(identifier.to_string()).or_default().push(row);
    }

    let mut records = Vec::new();
    for group in groups.values() {
        for row in group {
            let Some(created) = row.created_at() else {
                continue;
            };
            for field in LIFECYCLE_FIELDS {
                if let Some(stamp) = row.get_datetime(field) {
                    if stamp < created {
                        if let Some(id) = row.id() {
                            records.push(ContradictionRecord {
                                id: Uuid::new_v4(),
                                rule_name: rule.name.clone(),
                                table: table.to_string(),
                                severity: rule.severity,
                                row_ids: vec![id],
                                details: format!(
                                    "{} ({}) precedes created_at ({})",
                                    field,
                                    stamp.to_rfc3339(),
                                    created.to_rfc3339()
                                ),
                                detected_at: Utc::now(),
                            });
                        }
                        break;
                    }
                }
            }
        }
    }

    records
}

fn check_action_conflict(table: &str, rows: &[Row], rule: &TableRule) -> Vec<ContradictionRecord> {
    // Group by the serialized trigger conditions.
    let mut trigger_map: HashMap<String, Vec<&Row>> = HashMap::new();
    for row in rows {
        let trigger_key = row
            .get_json("trigger_conditions")
            .map(|v| v.to_string())
            .unwrap_or_default();
        if trigger_key.is_empty() || trigger_key == "null" {
            continue;
        }
        trigger_map.entry(trigger_key).or_default().push(row);
    }

    let mut records = Vec::new();
    for group in trigger_map.values() {
        if group.len() < 2 {
            continue;
        }
        for (i, a) in group.iter().enumerate() {
            for b in group.iter().skip(i + 1) {
                let actions_a = a.get_json("actions");
                let actions_b = b.get_json("actions");
                if actions_a != actions_b {
                    let (Some(id_a), Some(id_b)) = (a.id(), b.id()) else {
                        continue;
                    };
                    let name_a = a.get_str("playbook_name").unwrap_or("<unnamed>");
                    let name_b = b.get_str("playbook_name").unwrap_or("<unnamed>");
                    records.push(ContradictionRecord {
                        id: Uuid::new_v4(),
                        rule_name: rule.name.clone(),
                        table: table.to_string(),
                        severity: rule.severity,
                        row_ids: vec![id_a, id_b],
                        details: format!(
                            "Conflicting actions for the same trigger: {} vs {}",
                            name_a, name_b
                        ),
                        detected_at: Utc::now(),
                    });
                }
            }
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemon_schema::builtin::register_builtins;
    use mnemon_schema::SchemaRegistry;

    async fn store() -> Arc<TableStore> {
        let registry = Arc::new(SchemaRegistry::new("/nonexistent"));
        register_builtins(&registry).unwrap();
        let store = Arc::new(TableStore::in_memory(registry).await.unwrap());
        store.materialize().await.unwrap();
        store
    }

    async fn insert_doc(store: &TableStore, title: &str, summary: &str, path: &str) -> String {
        store
            .insert(
                "memory_documents",
                &serde_json::json!({
                    "title": title,
                    "summary": summary,
                    "file_path": path,
                }),
                false,
            )
            .await
            .unwrap()
            .id()
            .unwrap()
    }

    #[test]
    fn jaccard_basics() {
        assert_eq!(jaccard("a b c", "a b c"), 1.0);
        assert_eq!(jaccard("a b", "c d"), 0.0);
        assert!((jaccard("a b c", "a b d") - 0.5).abs() < 1e-9);
        assert_eq!(jaccard("", ""), 0.0);
    }

    #[tokio::test]
    async fn duplicate_documents_detected_at_medium() {
        let store = store().await;
        let id1 = insert_doc(
            &store,
            "Test Document Alpha",
            "a summary of alpha things",
            "/a",
        )
        .await;
        let id2 = insert_doc(
            &store,
            "Test Document Alpha",
            "a summary of alpha things",
            "/b",
        )
        .await;

        let detector = ContradictionDetector::with_builtin_rules(Arc::clone(&store));
        let records = detector.detect("memory_documents", 1000).await.unwrap();

        let dup = records
            .iter()
            .find(|r| r.rule_name == "duplicate_content")
            .expect("duplicate_content record");
        assert_eq!(dup.severity, ContradictionSeverity::Medium);
        assert!(dup.row_ids.contains(&id1));
        assert!(dup.row_ids.contains(&id2));
    }

    #[tokio::test]
    async fn dissimilar_documents_pass() {
        let store = store().await;
        insert_doc(&store, "Quarterly Budget", "finance numbers", "/a").await;
        insert_doc(&store, "Hiking Guide", "trail maps and routes", "/b").await;

        let detector = ContradictionDetector::with_builtin_rules(Arc::clone(&store));
        let records = detector.detect("memory_documents", 1000).await.unwrap();
        assert!(records.iter().all(|r| r.rule_name != "duplicate_content"));
    }

    #[tokio::test]
    async fn temporal_rule_flags_updated_before_created() {
        let store = store().await;
        let row = store
            .insert(
                "memory_documents",
                &serde_json::json!({
                    "title": "Backdated",
                    "file_path": "/x",
                    "updated_at": "2001-01-01T00:00:00Z",
                }),
                false,
            )
            .await
            .unwrap();
        // A clean second row, same group key not required.
        insert_doc(&store, "Fresh", "fine", "/y").await;

        let detector = ContradictionDetector::with_builtin_rules(Arc::clone(&store));
        let records = detector.detect("memory_documents", 1000).await.unwrap();
        let temporal = records
            .iter()
            .find(|r| r.rule_name == "conflicting_dates")
            .expect("temporal record");
        assert_eq!(temporal.row_ids, vec![row.id().unwrap()]);
        assert_eq!(temporal.severity, ContradictionSeverity::Low);
    }

    #[tokio::test]
    async fn action_conflict_on_same_trigger() {
        let store = store().await;
        for (name, actions) in [("restart_service", vec!["restart"]), ("page_oncall", vec!["page"])] {
            store
                .insert(
                    "memory_playbooks",
                    &serde_json::json!({
                        "playbook_name": name,
                        "trigger_conditions": {"signal": "disk_full"},
                        "actions": actions,
                    }),
                    false,
                )
                .await
                .unwrap();
        }

        let detector = ContradictionDetector::with_builtin_rules(Arc::clone(&store));
        let records = detector.detect("memory_playbooks", 1000).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].severity, ContradictionSeverity::Critical);
        assert_eq!(records[0].row_ids.len(), 2);
    }

    #[tokio::test]
    async fn same_actions_do_not_conflict() {
        let store = store().await;
        for name in ["pb_one", "pb_two"] {
            store
                .insert(
                    "memory_playbooks",
                    &serde_json::json!({
                        "playbook_name": name,
                        "trigger_conditions": {"signal": "disk_full"},
                        "actions": ["restart"],
                    }),
                    false,
                )
                .await
                .unwrap();
        }

        let detector = ContradictionDetector::with_builtin_rules(Arc::clone(&store));
        let records = detector.detect("memory_playbooks", 1000).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn snapshot_and_summary() {
        let store = store().await;
        insert_doc(&store, "Dup Title Here", "same text body", "/a").await;
        insert_doc(&store, "Dup Title Here", "same text body", "/b").await;

        let detector = ContradictionDetector::with_builtin_rules(Arc::clone(&store));
        let snapshot = detector.scan_all(1000).await.unwrap();
        assert!(!snapshot.is_empty());

        let summary = ContradictionDetector::summarize(&snapshot);
        assert_eq!(summary.total, snapshot.len());
        assert_eq!(summary.by_table.get("memory_documents"), Some(&snapshot.len()));
        assert_eq!(summary.critical_count, 0);
    }

    #[test]
    fn rule_pack_from_yaml() {
        let yaml = r#"
tables:
  memory_documents:
    - name: near_dupes
      fields: [title]
      method: similarity
      threshold: 0.9
      severity: high
"#;
        let pack = RulePack::from_yaml(yaml).unwrap();
        let rules = pack.rules_for("memory_documents");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].method, RuleMethod::Similarity);
        assert_eq!(rules[0].severity, ContradictionSeverity::High);
    }
}
