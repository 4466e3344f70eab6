//! Queue configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::TaskError;

/// Configuration for a `TaskQueue`.
///
/// Every field has a default, so a partial JSON document is enough:
/// ```json
/// { "max_threads": 4 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Concurrent lane size. 0 = cached (grow on demand), N = fixed N workers.
    pub max_threads: usize,

    /// Prefix for worker and dispatcher thread names.
    pub thread_name: String,

    /// Default for `TaskBuilder::check_liveness`.
    pub check_liveness: bool,

    /// How long `shutdown` waits for in-flight work when the queue owns its runtime.
    pub shutdown_grace_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_threads: 0,
            thread_name: "task-queue".to_string(),
            check_liveness: true,
            shutdown_grace_ms: 1_000,
        }
    }
}

impl QueueConfig {
    pub fn from_json_str(s: &str) -> Result<Self, TaskError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, TaskError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
