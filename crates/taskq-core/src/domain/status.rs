//! Task status state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Task status.
///
/// State transitions:
/// - Idle -> Running -> Success
/// - Idle -> Running -> Failure
/// - Idle -> Running -> Cancelled (cancel arrived mid-execution)
/// - Idle -> Cancelled (cancel arrived while still queued)
///
/// Terminal states never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Registered, waiting for a lane to pick it up.
    Idle,

    /// Currently being executed by a lane worker.
    Running,

    /// Work returned a value.
    Success,

    /// Work returned an error or panicked.
    Failure,

    /// Cancelled before or during execution.
    Cancelled,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failure | TaskStatus::Cancelled
        )
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            TaskStatus::Idle => 0,
            TaskStatus::Running => 1,
            TaskStatus::Success => 2,
            TaskStatus::Failure => 3,
            TaskStatus::Cancelled => 4,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TaskStatus::Idle,
            1 => TaskStatus::Running,
            2 => TaskStatus::Success,
            3 => TaskStatus::Failure,
            _ => TaskStatus::Cancelled,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Idle => "idle",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failure => "failure",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}
