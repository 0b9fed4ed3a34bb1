//! Lifecycle policies.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunable thresholds for the lifecycle manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    /// Agents older than this are retired by the monitor.
    #[serde(default = "default_max_lifetime")]
    pub max_agent_lifetime_minutes: i64,

    /// Agents idle longer than this are retired by the monitor.
    #[serde(default = "default_max_idle")]
    pub max_idle_minutes: i64,

    /// Below this trust an agent is revoked rather than reused.
    #[serde(default = "default_min_trust")]
    pub min_trust_threshold: f64,

    /// Heartbeats older than this mark an agent stale.
    #[serde(default = "default_heartbeat_stale")]
    pub heartbeat_stale_seconds: i64,

    /// Default concurrency bound for queue draining.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_jobs: usize,

    /// Monitor tick interval.
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_seconds: u64,

    /// Backoff after a monitor pass fails.
    #[serde(default = "default_monitor_backoff")]
    pub monitor_backoff_seconds: u64,
}

fn default_max_lifetime() -> i64 {
    60
}

fn default_max_idle() -> i64 {
    10
}

fn default_min_trust() -> f64 {
    0.3
}

fn default_heartbeat_stale() -> i64 {
    120
}

fn default_max_concurrent() -> usize {
    5
}

fn default_monitor_interval() -> u64 {
    30
}

fn default_monitor_backoff() -> u64 {
    60
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            max_agent_lifetime_minutes: default_max_lifetime(),
            max_idle_minutes: default_max_idle(),
            min_trust_threshold: default_min_trust(),
            heartbeat_stale_seconds: default_heartbeat_stale(),
            max_concurrent_jobs: default_max_concurrent(),
            monitor_interval_seconds: default_monitor_interval(),
            monitor_backoff_seconds: default_monitor_backoff(),
        }
    }
}

impl LifecyclePolicy {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_seconds)
    }

    pub fn monitor_backoff(&self) -> Duration {
        Duration::from_secs(self.monitor_backoff_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy_table() {
        let policy = LifecyclePolicy::default();
        assert_eq!(policy.max_agent_lifetime_minutes, 60);
        assert_eq!(policy.max_idle_minutes, 10);
        assert_eq!(policy.min_trust_threshold, 0.3);
        assert_eq!(policy.heartbeat_stale_seconds, 120);
        assert_eq!(policy.max_concurrent_jobs, 5);
        assert_eq!(policy.monitor_interval_seconds, 30);
        assert_eq!(policy.monitor_backoff_seconds, 60);
    }

    #[test]
    fn partial_deserialization_fills_defaults() {
        let policy: LifecyclePolicy = serde_json::from_str(r#"{"max_concurrent_jobs": 2}"#).unwrap();
        assert_eq!(policy.max_concurrent_jobs, 2);
        assert_eq!(policy.max_idle_minutes, 10);
    }
}
