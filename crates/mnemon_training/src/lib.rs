//! Auto-training triggers.
//!
//! Each table carries a policy; the pipeline calls `on_inserted` per row
//! and training fires when
//!
//! - new rows reach `row_threshold`, or
//! - `time_threshold_hours` elapsed since the last training and new rows
//!   reach `min_rows`, or
//! - the table was never trained and new rows reach `min_rows`.
//!
//! Firing emits a `training_required` event (fire-and-forget - no learner
//! acknowledgement is awaited), resets the counter and stamps
//! `last_training_at`. Counters live in SQLite so they survive restarts.

use chrono::{DateTime, Utc};
use mnemon_governance::{update_kinds, GovernanceClient, UpdateSubmission};
use mnemon_protocol::{Event, EventSink, RiskLevel};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row as _, Sqlite};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("No training policy for table: {0}")]
    NoPolicy(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Per-table training policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingPolicy {
    pub row_threshold: u64,
    pub time_threshold_hours: i64,
    pub min_rows: u64,
    pub training_type: String,
}

impl TrainingPolicy {
    pub fn new(
        row_threshold: u64,
        time_threshold_hours: i64,
        min_rows: u64,
        training_type: impl Into<String>,
    ) -> Self {
        Self {
            row_threshold,
            time_threshold_hours,
            min_rows,
            training_type: training_type.into(),
        }
    }
}

/// The shipped policy table.
pub fn default_policies() -> BTreeMap<String, TrainingPolicy> {
    BTreeMap::from([
        (
            "memory_documents".to_string(),
            TrainingPolicy::new(50, 24, 10, "document_embedding"),
        ),
        (
            "memory_codebases".to_string(),
            TrainingPolicy::new(10, 48, 5, "code_analysis"),
        ),
        (
            "memory_playbooks".to_string(),
            TrainingPolicy::new(20, 6, 5, "playbook_learning"),
        ),
        (
            "memory_insights".to_string(),
            TrainingPolicy::new(30, 24, 10, "insight_synthesis"),
        ),
        (
            "memory_sub_agents".to_string(),
            TrainingPolicy::new(15, 12, 5, "agent_performance_learning"),
        ),
    ])
}

/// Counter state for one table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CounterState {
    pub new_rows: u64,
    pub last_training_at: Option<DateTime<Utc>>,
}

/// Per-table status line for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingStatus {
    pub new_rows: u64,
    pub row_threshold: u64,
    pub progress_percent: f64,
    pub last_training_at: Option<DateTime<Utc>>,
    pub training_type: String,
    pub ready_for_training: bool,
}

/// The training trigger. Counters are SQLite-backed.
pub struct TrainingTrigger {
    pool: Pool<Sqlite>,
    policies: BTreeMap<String, TrainingPolicy>,
    events: Arc<dyn EventSink>,
    governance: Option<GovernanceClient>,
}

impl TrainingTrigger {
    pub fn new(
        pool: Pool<Sqlite>,
        policies: BTreeMap<String, TrainingPolicy>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            pool,
            policies,
            events,
            governance: None,
        }
    }

    /// Route training audit records through the governance gateway.
    pub fn with_governance(mut self, governance: GovernanceClient) -> Self {
        self.governance = Some(governance);
        self
    }

    /// Create the counter table. Safe to call repeatedly.
    pub async fn init(&self) -> Result<(), TrainingError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS training_counters (
                table_name TEXT PRIMARY KEY,
                new_rows INTEGER NOT NULL DEFAULT 0,
                last_training_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record one inserted row. Returns `true` when training fired.
    pub async fn on_inserted(&self, table: &str) -> Result<bool, TrainingError> {
        sqlx::query(
            r#"
            INSERT INTO training_counters (table_name, new_rows)
            VALUES (?, 1)
            ON CONFLICT(table_name) DO UPDATE SET new_rows = new_rows + 1
            "#,
        )
        .bind(table)
        .execute(&self.pool)
        .await?;

        let Some(policy) = self.policies.get(table) else {
            return Ok(false);
        };

        let state = self.counter(table).await?;
        debug!("{}: {} new rows since last training", table, state.new_rows);

        if should_fire(policy, &state, Utc::now()) {
            self.fire(table, policy, state.new_rows).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Fire training regardless of thresholds.
    pub async fn force_training(&self, table: &str) -> Result<(), TrainingError> {
        let policy = self
            .policies
            .get(table)
            .ok_or_else(|| TrainingError::NoPolicy(table.to_string()))?;
        let state = self.counter(table).await?;
        self.fire(table, policy, state.new_rows).await
    }

    async fn fire(
        &self,
        table: &str,
        policy: &TrainingPolicy,
        row_count: u64,
    ) -> Result<(), TrainingError> {
        info!(
            "Triggering training: {} for {} ({} new rows)",
            policy.training_type, table, row_count
        );

        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO training_counters (table_name, new_rows, last_training_at)
            VALUES (?, 0, ?)
            ON CONFLICT(table_name) DO UPDATE SET new_rows = 0, last_training_at = excluded.last_training_at
            "#,
        )
        .bind(table)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        // Fan-out is fire-and-forget: downstream learners subscribe to the
        // bus; nobody is awaited.
        self.events
            .publish(Event::TrainingRequired {
                table: table.to_string(),
                training_type: policy.training_type.clone(),
                row_count,
                at: now,
            })
            .await;

        if let Some(governance) = &self.governance {
            let decision = governance
                .submit(UpdateSubmission::new(
                    update_kinds::TRAINING_COMPLETED,
                    vec!["memory_tables".to_string(), table.to_string()],
                    serde_json::json!({
                        "table": table,
                        "training_type": policy.training_type,
                        "row_count": row_count,
                    }),
                    RiskLevel::Low,
                    "auto_training_trigger",
                ))
                .await;
            if !decision.approved {
                warn!("Training audit record for {} left pending", table);
            }
        }

        Ok(())
    }

    /// Current counter for one table.
    pub async fn counter(&self, table: &str) -> Result<CounterState, TrainingError> {
        let row = sqlx::query(
            "SELECT new_rows, last_training_at FROM training_counters WHERE table_name = ?",
        )
        .bind(table)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(CounterState::default());
        };

        let new_rows: i64 = row.try_get("new_rows")?;
        let last_training_at: Option<String> = row.try_get("last_training_at")?;
        Ok(CounterState {
            new_rows: new_rows.max(0) as u64,
            last_training_at: last_training_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        })
    }

    /// Status of every table with a policy.
    pub async fn status(&self) -> Result<BTreeMap<String, TrainingStatus>, TrainingError> {
        let mut status = BTreeMap::new();
        for (table, policy) in &self.policies {
            let state = self.counter(table).await?;
            let progress =
                ((state.new_rows as f64 / policy.row_threshold as f64) * 100.0).min(100.0);
            status.insert(
                table.clone(),
                TrainingStatus {
                    new_rows: state.new_rows,
                    row_threshold: policy.row_threshold,
                    progress_percent: progress,
                    last_training_at: state.last_training_at,
                    training_type: policy.training_type.clone(),
                    ready_for_training: state.new_rows >= policy.min_rows,
                },
            );
        }
        Ok(status)
    }

    pub fn has_policy(&self, table: &str) -> bool {
        self.policies.contains_key(table)
    }
}

/// The firing rule.
fn should_fire(policy: &TrainingPolicy, state: &CounterState, now: DateTime<Utc>) -> bool {
    if state.new_rows >= policy.row_threshold {
        return true;
    }

    match state.last_training_at {
        Some(last) => {
            let hours = (now - last).num_seconds() as f64 / 3600.0;
            hours >= policy.time_threshold_hours as f64 && state.new_rows >= policy.min_rows
        }
        // Never trained: min_rows alone is enough to bootstrap.
        None => state.new_rows >= policy.min_rows,
    }
}
