//! The shared agent runtime.
//!
//! State lives in an atomic word so the lifecycle manager's reuse scan
//! can claim an idle agent with a single compare-exchange; everything
//! else (counters, trust, heartbeat) sits behind a mutex that is never
//! held across an await.

use crate::executor::JobExecutor;
use chrono::{DateTime, Utc};
use mnemon_governance::{update_kinds, GovernanceClient, UpdateSubmission};
use mnemon_protocol::{AgentId, AgentKind, AgentSnapshot, AgentState, JobId, JobOutcome, JobSpec, RiskLevel};
use mnemon_schema::TableStore;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

const STATE_INITIALIZING: u8 = 0;
const STATE_IDLE: u8 = 1;
const STATE_BUSY: u8 = 2;
const STATE_OFFLINE: u8 = 3;

fn state_from_word(word: u8) -> AgentState {
    match word {
        STATE_INITIALIZING => AgentState::Initializing,
        STATE_IDLE => AgentState::Idle,
        STATE_BUSY => AgentState::Busy,
        _ => AgentState::Offline,
    }
}

/// The manifest half of an agent: what it is, what it may do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub kind: AgentKind,
    pub name: String,
    /// Broad role: "specialist", "worker", or "orchestrator".
    pub agent_type: String,
    pub mission: String,
    pub capabilities: Vec<String>,
    pub constraints: serde_json::Value,
}

impl AgentSpec {
    /// Initial trust derived from the manifest. Neutral 0.5 baseline;
    /// strict constraints and a narrow capability set earn a bonus,
    /// orchestrator power costs one.
    pub fn initial_trust(&self) -> f64 {
        let mut trust: f64 = 0.5;

        let constraint = |key: &str| self.constraints.get(key);
        if constraint("read_only").and_then(|v| v.as_bool()).unwrap_or(false) {
            trust += 0.10;
        }
        if constraint("requires_approval").and_then(|v| v.as_bool()).unwrap_or(false) {
            trust += 0.10;
        }
        if constraint("max_file_size_mb").map(|v| !v.is_null()).unwrap_or(false) {
            trust += 0.05;
        }
        if self.capabilities.len() <= 3 {
            trust += 0.10;
        }
        if self.agent_type == "orchestrator" {
            trust -= 0.10;
        }

        trust.clamp(0.0, 1.0)
    }
}

#[derive(Debug)]
struct AgentCore {
    current_job: Option<JobId>,
    jobs_completed: u64,
    jobs_failed: u64,
    trust_score: f64,
    last_heartbeat_at: Option<DateTime<Utc>>,
    last_job_at: Option<DateTime<Utc>>,
}

/// A live agent instance.
pub struct AgentRuntime {
    id: AgentId,
    spec: AgentSpec,
    spawned_at: DateTime<Utc>,
    state: AtomicU8,
    core: Mutex<AgentCore>,
    executor: Box<dyn JobExecutor>,
    governance: Option<GovernanceClient>,
    store: Option<Arc<TableStore>>,
}

impl AgentRuntime {
    pub fn new(spec: AgentSpec, instance_id: Option<String>, executor: Box<dyn JobExecutor>) -> Self {
        let id = match instance_id {
            Some(raw) => AgentId::parse(&raw).unwrap_or_else(|_| AgentId::generate(spec.kind.as_str())),
            None => AgentId::generate(spec.kind.as_str()),
        };
        let trust = spec.initial_trust();
        Self {
            id,
            spec,
            spawned_at: Utc::now(),
            state: AtomicU8::new(STATE_INITIALIZING),
            core: Mutex::new(AgentCore {
                current_job: None,
                jobs_completed: 0,
                jobs_failed: 0,
                trust_score: trust,
                last_heartbeat_at: None,
                last_job_at: None,
            }),
            executor,
            governance: None,
            store: None,
        }
    }

    /// Route manifest registration through the governance gateway.
    pub fn with_governance(mut self, governance: GovernanceClient) -> Self {
        self.governance = Some(governance);
        self
    }

    /// Mirror agent state into the `memory_sub_agents` table.
    pub fn with_store(mut self, store: Arc<TableStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn kind(&self) -> AgentKind {
        self.spec.kind
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    pub fn state(&self) -> AgentState {
        state_from_word(self.state.load(Ordering::SeqCst))
    }

    pub fn trust_score(&self) -> f64 {
        self.core.lock().unwrap_or_else(|e| e.into_inner()).trust_score
    }

    pub fn spawned_at(&self) -> DateTime<Utc> {
        self.spawned_at
    }

    pub fn last_heartbeat_at(&self) -> Option<DateTime<Utc>> {
        self.core
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_heartbeat_at
    }

    pub fn last_job_at(&self) -> Option<DateTime<Utc>> {
        self.core
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_job_at
    }

    /// Register manifest and schema entry, compute trust, go idle.
    ///
    /// Registration failures are non-fatal: the agent can work without
    /// its manifest entry, and the failure is logged.
    pub async fn initialize(&self) {
        info!("Initializing {} ({})", self.spec.name, self.id);

        if let Some(governance) = &self.governance {
            let decision = governance
                .submit(UpdateSubmission::new(
                    update_kinds::AGENT_REGISTRATION,
                    vec!["manifest".to_string(), "sub_agents".to_string()],
                    serde_json::json!({
                        "agent_id": self.id.to_string(),
                        "name": self.spec.name,
                        "kind": self.spec.kind.as_str(),
                        "mission": self.spec.mission,
                        "capabilities": self.spec.capabilities,
                        "constraints": self.spec.constraints,
                    }),
                    RiskLevel::Low,
                    "agent_lifecycle_manager",
                ))
                .await;
            debug!("Manifest registration for {}: pending={}", self.id, decision.pending);
        }

        if let Some(store) = &self.store {
            let result = store
                .insert(
                    "memory_sub_agents",
                    &serde_json::json!({
                        "agent_id": self.id.to_string(),
                        "agent_name": self.spec.name,
                        "agent_type": self.spec.agent_type,
                        "mission": self.spec.mission,
                        "capabilities": self.spec.capabilities,
                        "constraints": self.spec.constraints,
                        "status": "idle",
                        "created_by": "agent_lifecycle_manager",
                    }),
                    true,
                )
                .await;
            if let Err(e) = result {
                error!("Failed to create schema entry for {}: {}", self.id, e);
            }
        }

        self.state.store(STATE_IDLE, Ordering::SeqCst);
        info!(
            "{} initialized (trust: {:.2})",
            self.spec.name,
            self.trust_score()
        );
    }

    /// Record a heartbeat.
    pub async fn heartbeat(&self) {
        let now = Utc::now();
        {
            let mut core = self.core.lock().unwrap_or_else(|e| e.into_inner());
            core.last_heartbeat_at = Some(now);
        }
        if let Some(store) = &self.store {
            let _ = self
                .patch_schema_entry(store, serde_json::json!({"last_active_at": now.to_rfc3339()}))
                .await;
        }
    }

    /// Claim this agent for a job: atomic idle -> busy flip. Exactly one
    /// caller wins; everyone else sees `false`.
    pub fn try_claim(&self) -> bool {
        self.state
            .compare_exchange(STATE_IDLE, STATE_BUSY, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Release a claim made with `try_claim` without running a job.
    pub fn release_claim(&self) {
        let _ = self.state.compare_exchange(
            STATE_BUSY,
            STATE_IDLE,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Execute a job. The caller must hold the claim (`try_claim`), or
    /// pass `claimed = false` to let this method claim for itself.
    ///
    /// Executor errors do not crash the agent; they produce a failed
    /// outcome and count against trust.
    pub async fn execute_job(&self, job: JobSpec, claimed: bool) -> JobOutcome {
        if !claimed && !self.try_claim() {
            return JobOutcome {
                job_id: job.id,
                success: false,
                result: None,
                error: Some(format!("agent {} is not idle", self.id)),
                duration_ms: 0,
                agent_id: self.id.clone(),
            };
        }

        info!("{} starting job {} ({})", self.spec.name, job.id, job.kind);
        {
            let mut core = self.core.lock().unwrap_or_else(|e| e.into_inner());
            core.current_job = Some(job.id);
        }
        self.persist_status("busy", Some(&job.id.to_string())).await;

        let started = Instant::now();
        let outcome = self.executor.run(&job).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (success, result, error) = match outcome {
            Ok(value) => {
                info!("{} completed job {}", self.spec.name, job.id);
                (true, Some(value), None)
            }
            Err(e) => {
                error!("{} failed job {}: {:#}", self.spec.name, job.id, e);
                (false, None, Some(format!("{:#}", e)))
            }
        };

        {
            let mut core = self.core.lock().unwrap_or_else(|e| e.into_inner());
            if success {
                core.jobs_completed += 1;
            } else {
                core.jobs_failed += 1;
            }
            core.current_job = None;
            core.last_job_at = Some(Utc::now());

            // EMA: trust follows the observed success rate.
            let total = core.jobs_completed + core.jobs_failed;
            let success_rate = if total > 0 {
                core.jobs_completed as f64 / total as f64
            } else {
                0.5
            };
            core.trust_score = (0.7 * success_rate + 0.3 * core.trust_score).clamp(0.0, 1.0);
        }

        self.state.store(STATE_IDLE, Ordering::SeqCst);
        self.persist_status("idle", None).await;
        self.persist_counters().await;

        JobOutcome {
            job_id: job.id,
            success,
            result,
            error,
            duration_ms,
            agent_id: self.id.clone(),
        }
    }

    /// Terminate: go offline, deregister, log final stats. Irreversible.
    pub async fn terminate(&self) {
        info!("Terminating {} ({})", self.spec.name, self.id);
        self.state.store(STATE_OFFLINE, Ordering::SeqCst);
        self.persist_status("offline", Some("terminated")).await;

        let (completed, failed, trust) = {
            let core = self.core.lock().unwrap_or_else(|e| e.into_inner());
            (core.jobs_completed, core.jobs_failed, core.trust_score)
        };

        if let Some(governance) = &self.governance {
            let decision = governance
                .submit(UpdateSubmission::new(
                    update_kinds::AGENT_DEREGISTRATION,
                    vec!["manifest".to_string(), "sub_agents".to_string()],
                    serde_json::json!({
                        "agent_id": self.id.to_string(),
                        "jobs_completed": completed,
                        "jobs_failed": failed,
                        "final_trust_score": trust,
                    }),
                    RiskLevel::Low,
                    "agent_lifecycle_manager",
                ))
                .await;
            if decision.pending {
                warn!("Manifest deregistration for {} left pending", self.id);
            }
        }

        info!(
            "{} terminated (completed {} jobs, trust: {:.2})",
            self.spec.name, completed, trust
        );
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        let core = self.core.lock().unwrap_or_else(|e| e.into_inner());
        let total = core.jobs_completed + core.jobs_failed;
        AgentSnapshot {
            agent_id: self.id.clone(),
            agent_name: self.spec.name.clone(),
            kind: self.spec.kind,
            mission: self.spec.mission.clone(),
            capabilities: self.spec.capabilities.clone(),
            state: self.state(),
            current_job: core.current_job,
            jobs_completed: core.jobs_completed,
            jobs_failed: core.jobs_failed,
            success_rate: if total > 0 {
                core.jobs_completed as f64 / total as f64
            } else {
                0.0
            },
            trust_score: core.trust_score,
            spawned_at: self.spawned_at,
            last_heartbeat_at: core.last_heartbeat_at,
            last_job_at: core.last_job_at,
        }
    }

    async fn persist_status(&self, status: &str, task: Option<&str>) {
        let Some(store) = &self.store else { return };
        let _ = self
            .patch_schema_entry(
                store,
                serde_json::json!({
                    "status": status,
                    "current_task": task,
                }),
            )
            .await;
    }

    async fn persist_counters(&self) {
        let Some(store) = &self.store else { return };
        let (completed, failed) = {
            let core = self.core.lock().unwrap_or_else(|e| e.into_inner());
            (core.jobs_completed as i64, core.jobs_failed as i64)
        };
        let _ = self
            .patch_schema_entry(
                store,
                serde_json::json!({
                    "tasks_completed": completed,
                    "tasks_failed": failed,
                }),
            )
            .await;
    }

    async fn patch_schema_entry(
        &self,
        store: &TableStore,
        patch: serde_json::Value,
    ) -> mnemon_schema::Result<()> {
        let Some(row) = store
            .find_by_fingerprint("memory_sub_agents", self.id.as_str())
            .await?
        else {
            return Ok(());
        };
        if let Some(id) = row.id() {
            store.update("memory_sub_agents", &id, &patch).await?;
        }
        Ok(())
    }
}
