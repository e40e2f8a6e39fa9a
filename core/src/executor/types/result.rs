use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::task::{TaskId, TaskStatus};
use crate::state::SessionStatus;

/// Final state of a single task within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub retry_count: u32,
    /// Duration of the successful attempt.
    pub duration_ms: Option<u64>,
    /// Last error reported for the task, if any.
    pub error: Option<String>,
    /// Executor output of the successful attempt (may be truncated by the executor).
    pub output: Option<String>,
    /// Failed ancestor that blocked this task.
    pub blocked_by: Option<TaskId>,
}

/// Terminal report of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub status: SessionStatus,
    /// Abort reason for failed sessions.
    pub failure: Option<String>,

    pub completed_count: usize,
    pub failed_count: usize,
    pub blocked_count: usize,
    /// Tasks that never reached a terminal state (aborted sessions only).
    pub unfinished_count: usize,

    /// Acquisitions that had to wait or timed out.
    pub lock_contention_events: u64,

    pub wall_clock_duration_ms: u64,

    pub completed: Vec<TaskId>,
    pub failed: Vec<TaskId>,
    pub blocked: Vec<TaskId>,
    pub unfinished: Vec<TaskId>,

    pub outcomes: BTreeMap<TaskId, TaskOutcome>,
}

impl SessionReport {
    pub fn wall_clock_duration(&self) -> Duration {
        Duration::from_millis(self.wall_clock_duration_ms)
    }

    pub fn all_completed(&self) -> bool {
        self.failed_count == 0 && self.blocked_count == 0 && self.unfinished_count == 0
    }

    pub fn outcome(&self, task_id: &str) -> Option<&TaskOutcome> {
        self.outcomes.get(task_id)
    }
}
