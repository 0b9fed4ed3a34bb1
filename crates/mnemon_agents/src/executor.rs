//! The job-execution seam.

use async_trait::async_trait;
use mnemon_protocol::JobSpec;

/// Kind-specific job logic. The runtime owns states, counters and trust;
/// an executor only turns a payload into a result value.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn run(&self, job: &JobSpec) -> anyhow::Result<serde_json::Value>;
}
