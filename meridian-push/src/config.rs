use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{Result, WatchError};

/// Tuning knobs of the fuzzy watch push engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// How long a single push may wait for the client acknowledgement
    pub push_task_timeout_ms: u64,
    /// Delay before a failed (retryable) push is attempted again
    pub push_task_retry_delay_ms: u64,
    /// Maximum number of service contexts per sync request
    pub sync_batch_size: usize,
    /// Coalescing window for change notifications
    pub change_notify_delay_ms: u64,
    /// Coalescing window for sync notifications
    pub sync_notify_delay_ms: u64,
    /// Scheduler scan period of the delay task engine
    pub process_interval_ms: u64,
    /// Upper bound of concurrently executing delay tasks
    pub max_concurrent_tasks: usize,
    /// Maximum number of patterns a single client may watch
    pub max_patterns_per_client: usize,
    /// Maximum number of services pushed by the initial sync of one pattern
    pub max_matched_services_per_pattern: usize,
    /// Period of the diff resync over all bindings
    pub resync_interval_ms: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            push_task_timeout_ms: 3_000,
            push_task_retry_delay_ms: 1_000,
            sync_batch_size: 10,
            change_notify_delay_ms: 0,
            sync_notify_delay_ms: 0,
            process_interval_ms: 100,
            max_concurrent_tasks: 64,
            max_patterns_per_client: 20,
            max_matched_services_per_pattern: 500,
            resync_interval_ms: 30_000,
        }
    }
}

impl PushConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sync_batch_size == 0 {
            return Err(WatchError::InvalidConfig(
                "sync_batch_size must be greater than 0".into(),
            ));
        }
        if self.push_task_timeout_ms == 0 {
            return Err(WatchError::InvalidConfig(
                "push_task_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(WatchError::InvalidConfig(
                "max_concurrent_tasks must be greater than 0".into(),
            ));
        }
        if self.process_interval_ms == 0 {
            return Err(WatchError::InvalidConfig(
                "process_interval_ms must be greater than 0".into(),
            ));
        }
        if self.max_patterns_per_client == 0 {
            return Err(WatchError::InvalidConfig(
                "max_patterns_per_client must be greater than 0".into(),
            ));
        }
        if self.max_matched_services_per_pattern == 0 {
            return Err(WatchError::InvalidConfig(
                "max_matched_services_per_pattern must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn push_task_timeout(&self) -> Duration {
        Duration::from_millis(self.push_task_timeout_ms)
    }

    pub fn push_task_retry_delay(&self) -> Duration {
        Duration::from_millis(self.push_task_retry_delay_ms)
    }

    pub fn change_notify_delay(&self) -> Duration {
        Duration::from_millis(self.change_notify_delay_ms)
    }

    pub fn sync_notify_delay(&self) -> Duration {
        Duration::from_millis(self.sync_notify_delay_ms)
    }

    pub fn process_interval(&self) -> Duration {
        Duration::from_millis(self.process_interval_ms)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_millis(self.resync_interval_ms)
    }
}
