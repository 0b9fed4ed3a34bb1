//! The lifecycle manager proper.

use crate::policy::LifecyclePolicy;
use chrono::Utc;
use indexmap::IndexMap;
use mnemon_agents::{AgentKindFactory, AgentRuntime};
use mnemon_governance::{update_kinds, GovernanceClient, UpdateSubmission};
use mnemon_protocol::{
    AgentId, AgentKind, AgentSnapshot, AgentState, Event, EventSink, JobId, JobOutcome, JobSpec,
    JobState, RiskLevel, ShutdownToken,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Poll interval while waiting for a busy agent to finish its job.
const BUSY_WAIT: Duration = Duration::from_millis(25);

/// Poll interval while the queue drain waits for capacity.
const CAPACITY_WAIT: Duration = Duration::from_millis(10);

/// One entry in the completed-jobs map. Reflects the most recent attempt
/// with that job id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub kind: AgentKind,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<JobOutcome>,
    pub updated_at: chrono::DateTime<Utc>,
}

/// Metrics of a terminated agent, kept until process end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedAgentMetrics {
    pub kind: AgentKind,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub final_trust_score: f64,
    pub spawned_at: chrono::DateTime<Utc>,
    pub terminated_at: chrono::DateTime<Utc>,
}

/// Overall lifecycle metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleMetrics {
    pub active_count: usize,
    pub revoked_count: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub total_jobs_executed: u64,
    pub average_trust_score: f64,
    pub pending_jobs: usize,
    pub completed_jobs: usize,
    pub archive: BTreeMap<String, ArchivedAgentMetrics>,
}

struct QueuedJob {
    kind: AgentKind,
    job: JobSpec,
}

struct MonitorHandle {
    token: ShutdownToken,
    task: tokio::task::JoinHandle<()>,
}

/// Spawns, reuses, monitors, retires, and revokes agents.
pub struct LifecycleManager {
    factory: Arc<dyn AgentKindFactory>,
    policy: LifecyclePolicy,
    active: Mutex<IndexMap<AgentId, Arc<AgentRuntime>>>,
    revoked: Mutex<HashSet<AgentId>>,
    queue: Mutex<VecDeque<QueuedJob>>,
    completed: Mutex<HashMap<JobId, JobRecord>>,
    archived: Mutex<HashMap<AgentId, ArchivedAgentMetrics>>,
    total_jobs: AtomicU64,
    events: Arc<dyn EventSink>,
    governance: Option<GovernanceClient>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl LifecycleManager {
    pub fn new(
        factory: Arc<dyn AgentKindFactory>,
        policy: LifecyclePolicy,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            factory,
            policy,
            active: Mutex::new(IndexMap::new()),
            revoked: Mutex::new(HashSet::new()),
            queue: Mutex::new(VecDeque::new()),
            completed: Mutex::new(HashMap::new()),
            archived: Mutex::new(HashMap::new()),
            total_jobs: AtomicU64::new(0),
            events,
            governance: None,
            monitor: Mutex::new(None),
        }
    }

    /// Route revocation audit records through the governance gateway.
    pub fn with_governance(mut self, governance: GovernanceClient) -> Self {
        self.governance = Some(governance);
        self
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    /// Spawn a new agent and track it.
    pub async fn spawn(&self, kind: AgentKind, instance_id: Option<String>) -> AgentSnapshot {
        let agent = Arc::new(self.factory.build(kind, instance_id));
        agent.initialize().await;
        info!("Spawned {} ({})", kind, agent.id());

        let snapshot = agent.snapshot();
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.insert(agent.id().clone(), agent);
        snapshot
    }

    /// Spawn and immediately claim for a job.
    async fn spawn_claimed(&self, kind: AgentKind) -> Arc<AgentRuntime> {
        let agent = Arc::new(self.factory.build(kind, None));
        agent.initialize().await;
        // A freshly initialized agent is idle and unshared: the claim wins.
        agent.try_claim();
        info!("Spawned {} ({})", kind, agent.id());

        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.insert(agent.id().clone(), Arc::clone(&agent));
        agent
    }

    /// Scan the active map, arrival-ordered, and atomically claim the
    /// first idle agent of the requested kind. Revoked ids and agents
    /// with a stale heartbeat are skipped.
    fn claim_idle(&self, kind: AgentKind) -> Option<Arc<AgentRuntime>> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let revoked = self.revoked.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();

        for (id, agent) in active.iter() {
            if agent.kind() != kind || revoked.contains(id) {
                continue;
            }
            let last_seen = agent.last_heartbeat_at().unwrap_or(agent.spawned_at());
            if (now - last_seen).num_seconds() > self.policy.heartbeat_stale_seconds {
                continue;
            }
            if agent.try_claim() {
                info!("Reusing agent {}", id);
                return Some(Arc::clone(agent));
            }
        }
        None
    }

    /// Execute a job through an agent of `kind`.
    ///
    /// With `reuse`, an idle agent is claimed when one exists; otherwise a
    /// fresh agent is spawned (and terminated again afterwards). Job
    /// failures are returned in the outcome after cleanup, never raised
    /// mid-flight.
    pub async fn execute_job(&self, kind: AgentKind, job: JobSpec, reuse: bool) -> JobOutcome {
        info!("Executing job {} (kind: {})", job.id, kind);

        let (agent, reused) = match reuse {
            true => match self.claim_idle(kind) {
                Some(agent) => (agent, true),
                None => (self.spawn_claimed(kind).await, false),
            },
            false => (self.spawn_claimed(kind).await, false),
        };

        self.record_job(JobRecord {
            job_id: job.id,
            kind,
            state: JobState::Running,
            outcome: None,
            updated_at: Utc::now(),
        });

        let outcome = agent.execute_job(job, true).await;
        self.total_jobs.fetch_add(1, Ordering::SeqCst);
        self.record_job(JobRecord {
            job_id: outcome.job_id,
            kind,
            state: if outcome.success {
                JobState::Completed
            } else {
                JobState::Failed
            },
            outcome: Some(outcome.clone()),
            updated_at: Utc::now(),
        });

        // Cleanup before the caller sees the outcome.
        let trust = agent.trust_score();
        if !outcome.success && trust < self.policy.min_trust_threshold {
            self.revoke(
                agent.id(),
                &format!(
                    "Trust score below threshold: {:.2} < {:.2}",
                    trust, self.policy.min_trust_threshold
                ),
            )
            .await;
        } else if !reused {
            self.terminate(agent.id()).await;
        }

        outcome
    }

    /// Append a job to the FIFO queue.
    pub fn submit_job(&self, kind: AgentKind, payload: serde_json::Value) -> JobId {
        let job = JobSpec::new(kind, payload);
        let job_id = job.id;
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.push_back(QueuedJob { kind, job });
        info!("Job {} queued ({} in queue)", job_id, queue.len());
        job_id
    }

    /// Drain the queue, each job an independent concurrent task running
    /// with reuse. Launches are suppressed while the number of busy
    /// agents has reached the cap. Returns once every drained job has
    /// finished.
    pub async fn process_queue(self: &Arc<Self>, max_concurrent: Option<usize>) -> usize {
        let cap = max_concurrent
            .unwrap_or(self.policy.max_concurrent_jobs)
            .max(1);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let mut launched = 0usize;

        loop {
            if in_flight.load(Ordering::SeqCst) >= cap || self.busy_count() >= cap {
                tokio::time::sleep(CAPACITY_WAIT).await;
                continue;
            }

            let queued = {
                let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
                queue.pop_front()
            };
            let Some(queued) = queued else { break };

            launched += 1;
            in_flight.fetch_add(1, Ordering::SeqCst);
            let manager = Arc::clone(self);
            let counter = Arc::clone(&in_flight);
            tokio::spawn(async move {
                manager.execute_job(queued.kind, queued.job, true).await;
                counter.fetch_sub(1, Ordering::SeqCst);
            });
        }

        while in_flight.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(CAPACITY_WAIT).await;
        }
        launched
    }

    /// Terminate an agent. Idempotent; returns `false` for unknown ids.
    ///
    /// An agent mid-job finishes that job first: termination waits for
    /// the busy state to clear before flipping it offline.
    pub async fn terminate(&self, id: &AgentId) -> bool {
        let agent = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.shift_remove(id)
        };
        let Some(agent) = agent else {
            warn!("Agent {} not found for termination", id);
            return false;
        };

        while agent.state() == AgentState::Busy {
            tokio::time::sleep(BUSY_WAIT).await;
        }
        agent.terminate().await;

        let snapshot = agent.snapshot();
        info!(
            "Agent {} final stats: {} jobs, trust: {:.2}",
            id,
            snapshot.jobs_completed + snapshot.jobs_failed,
            snapshot.trust_score
        );
        let mut archived = self.archived.lock().unwrap_or_else(|e| e.into_inner());
        archived.insert(
            id.clone(),
            ArchivedAgentMetrics {
                kind: snapshot.kind,
                jobs_completed: snapshot.jobs_completed,
                jobs_failed: snapshot.jobs_failed,
                final_trust_score: snapshot.trust_score,
                spawned_at: snapshot.spawned_at,
                terminated_at: Utc::now(),
            },
        );
        true
    }

    /// Revoke an agent: tombstone its id, terminate it, and emit a
    /// high-risk audit event. Idempotent on the id; a revoked id stays
    /// revoked for the life of the process.
    pub async fn revoke(&self, id: &AgentId, reason: &str) {
        let newly_revoked = {
            let mut revoked = self.revoked.lock().unwrap_or_else(|e| e.into_inner());
            revoked.insert(id.clone())
        };

        if newly_revoked {
            warn!("Revoking agent {}: {}", id, reason);
            self.events
                .publish(Event::AgentRevoked {
                    agent_id: id.clone(),
                    reason: reason.to_string(),
                    at: Utc::now(),
                })
                .await;

            if let Some(governance) = &self.governance {
                let decision = governance
                    .submit(UpdateSubmission::new(
                        update_kinds::AGENT_REVOCATION,
                        vec!["manifest".to_string(), "sub_agents".to_string()],
                        serde_json::json!({
                            "agent_id": id.to_string(),
                            "reason": reason,
                        }),
                        RiskLevel::High,
                        "agent_lifecycle_manager",
                    ))
                    .await;
                if decision.pending {
                    info!("Revocation audit for {} recorded as {}", id, decision.update_id);
                }
            }
        }

        self.terminate(id).await;
    }

    pub fn is_revoked(&self, id: &AgentId) -> bool {
        let revoked = self.revoked.lock().unwrap_or_else(|e| e.into_inner());
        revoked.contains(id)
    }

    /// Snapshot of one active agent. `None` after termination.
    pub fn status(&self, id: &AgentId) -> Option<AgentSnapshot> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.get(id).map(|agent| agent.snapshot())
    }

    /// Snapshots of all active agents, arrival-ordered.
    pub fn all_agents(&self) -> Vec<AgentSnapshot> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.values().map(|agent| agent.snapshot()).collect()
    }

    /// Most recent record for a job id.
    pub fn job_record(&self, job_id: &JobId) -> Option<JobRecord> {
        let completed = self.completed.lock().unwrap_or_else(|e| e.into_inner());
        completed.get(job_id).cloned()
    }

    pub fn busy_count(&self) -> usize {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active
            .values()
            .filter(|agent| agent.state() == AgentState::Busy)
            .count()
    }

    pub fn metrics(&self) -> LifecycleMetrics {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
        let mut trust_sum = 0.0;
        for agent in active.values() {
            *by_kind.entry(agent.kind().as_str().to_string()).or_insert(0) += 1;
            trust_sum += agent.trust_score();
        }
        let average_trust_score = if active.is_empty() {
            0.0
        } else {
            trust_sum / active.len() as f64
        };

        let archive = {
            let archived = self.archived.lock().unwrap_or_else(|e| e.into_inner());
            archived
                .iter()
                .map(|(id, m)| (id.to_string(), m.clone()))
                .collect()
        };

        LifecycleMetrics {
            active_count: active.len(),
            revoked_count: self.revoked.lock().unwrap_or_else(|e| e.into_inner()).len(),
            by_kind,
            total_jobs_executed: self.total_jobs.load(Ordering::SeqCst),
            average_trust_score,
            pending_jobs: self.queue.lock().unwrap_or_else(|e| e.into_inner()).len(),
            completed_jobs: self
                .completed
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .len(),
            archive,
        }
    }

    fn record_job(&self, record: JobRecord) {
        let mut completed = self.completed.lock().unwrap_or_else(|e| e.into_inner());
        completed.insert(record.job_id, record);
    }

    // === Monitoring ===

    /// Start the background monitor. No-op if already running.
    pub fn start_monitoring(self: &Arc<Self>) {
        let mut guard = self.monitor.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            return;
        }

        let token = ShutdownToken::new();
        let loop_token = token.clone();
        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            info!("Agent lifecycle monitoring started");
            loop {
                let interval = match manager.monitor_tick().await {
                    Ok(()) => manager.policy.monitor_interval(),
                    Err(e) => {
                        error!("Error in monitor loop: {:#}", e);
                        manager.policy.monitor_backoff()
                    }
                };
                if loop_token.sleep(interval).await {
                    break;
                }
            }
            info!("Agent lifecycle monitoring stopped");
        });

        *guard = Some(MonitorHandle { token, task });
    }

    /// Stop the monitor. Returns only after the loop has observed
    /// cancellation and exited.
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

    /// One monitor pass: health, then idle cleanup, then age cleanup.
    pub async fn monitor_tick(&self) -> anyhow::Result<()> {
        self.check_agent_health().await;
        self.cleanup_idle_agents().await;
        self.cleanup_old_agents().await;
        Ok(())
    }

    async fn check_agent_health(&self) {
        let agents = self.snapshot_active();
        let now = Utc::now();

        for (id, agent) in agents {
            if let Some(heartbeat) = agent.last_heartbeat_at() {
                let silent_for = (now - heartbeat).num_seconds();
                if silent_for > self.policy.heartbeat_stale_seconds {
                    warn!("Agent {} missed heartbeat ({}s)", id, silent_for);
                }
            }

            let trust = agent.trust_score();
            if trust < self.policy.min_trust_threshold {
                self.revoke(
                    &id,
                    &format!(
                        "Trust score below threshold: {:.2} < {:.2}",
                        trust, self.policy.min_trust_threshold
                    ),
                )
                .await;
                continue;
            }

            agent.heartbeat().await;
        }
    }

    async fn cleanup_idle_agents(&self) {
        let now = Utc::now();
        for (id, agent) in self.snapshot_active() {
            if agent.state() != AgentState::Idle {
                continue;
            }
            let reference = agent.last_job_at().unwrap_or(agent.spawned_at());
            let idle_minutes = (now - reference).num_seconds() as f64 / 60.0;
            if idle_minutes > self.policy.max_idle_minutes as f64 {
                info!("Terminating idle agent {} ({:.1} min idle)", id, idle_minutes);
                self.terminate(&id).await;
            }
        }
    }

    async fn cleanup_old_agents(&self) {
        let now = Utc::now();
        for (id, agent) in self.snapshot_active() {
            if agent.state() == AgentState::Busy {
                continue;
            }
            let lifetime_minutes = (now - agent.spawned_at()).num_seconds() as f64 / 60.0;
            if lifetime_minutes > self.policy.max_agent_lifetime_minutes as f64 {
                info!(
                    "Terminating old agent {} ({:.1} min lifetime)",
                    id, lifetime_minutes
                );
                self.terminate(&id).await;
            }
        }
    }

    fn snapshot_active(&self) -> Vec<(AgentId, Arc<AgentRuntime>)> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active
            .iter()
            .map(|(id, agent)| (id.clone(), Arc::clone(agent)))
            .collect()
    }
}
