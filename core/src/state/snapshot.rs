//! Session checkpoints.

use super::session::SessionStatus;
use crate::executor::lock::LockRecord;
use crate::executor::types::{TaskId, TaskStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CHECKPOINT_VERSION: &str = "1";

/// Point-in-time copy of a session: task statuses, retry counts and the lock
/// table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,
    /// Monotonic per session, starting at 1.
    pub seq: u64,
    pub taken_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub tasks: Vec<TaskCheckpoint>,
    pub locks: Vec<LockRecord>,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCheckpoint {
    pub id: TaskId,
    pub status: TaskStatus,
    pub retry_count: u32,
}

impl Checkpoint {
    pub fn new(
        session_id: impl Into<String>,
        seq: u64,
        status: SessionStatus,
        tasks: Vec<TaskCheckpoint>,
        locks: Vec<LockRecord>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            seq,
            taken_at: Utc::now(),
            status,
            tasks,
            locks,
            version: CHECKPOINT_VERSION.to_string(),
        }
    }

    /// Ids recorded as Completed, in graph order.
    pub fn completed_tasks(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn task(&self, id: &str) -> Option<&TaskCheckpoint> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize checkpoint")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize checkpoint")
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = self.to_json()?;
        fs::write(path.as_ref(), json)
            .with_context(|| format!("Failed to write checkpoint to {:?}", path.as_ref()))
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read checkpoint from {:?}", path.as_ref()))?;
        Self::from_json(&json)
    }
}
