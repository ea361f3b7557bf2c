use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Execution engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of step loops running at once
    pub max_concurrent_executions: u32,

    /// Maximum node visits per run segment before the execution fails
    pub max_steps_per_run: u32,

    /// Time budget for a single node handler
    pub node_timeout_ms: u64,

    /// Extra attempts for a failing node
    pub max_retries: u32,

    /// Delay before the first retry, doubled on each further attempt
    pub retry_backoff_ms: u64,

    /// Reply deadline for wait nodes without their own timeout. `None` waits forever.
    pub default_wait_timeout_secs: Option<u64>,

    /// Scheduler tick interval
    pub scheduler_interval_ms: u64,

    /// Capacity of the lifecycle event channel
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 64,
            max_steps_per_run: 100,
            node_timeout_ms: 30_000,
            max_retries: 2,
            retry_backoff_ms: 200,
            default_wait_timeout_secs: None,
            scheduler_interval_ms: 1_000,
            event_buffer: 1024,
        }
    }
}

impl EngineConfig {
    /// Node handler time budget
    #[inline]
    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }

    /// Backoff before retry number `attempt` (starting at 1)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }

    /// Scheduler tick interval
    #[inline]
    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler_interval_ms)
    }
}
