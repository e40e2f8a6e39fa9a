//! Session record.

use super::transitions::{StateTransition, TransitionError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub concurrency: usize,
    pub total_tasks: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Why the session failed, when it did.
    pub failure: Option<String>,
}

impl Session {
    pub fn new(concurrency: usize, total_tasks: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status: SessionStatus::Initializing,
            concurrency,
            total_tasks,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            failure: None,
        }
    }

    /// Move to `to`, stamping start and end times.
    pub fn transition_to(&mut self, to: SessionStatus) -> Result<SessionStatus, TransitionError> {
        StateTransition::validate(self.status, to)?;
        let from = self.status;
        self.status = to;

        let now = Utc::now();
        if to == SessionStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if to.is_terminal() {
            self.ended_at = Some(now);
        }
        Ok(from)
    }

    pub fn duration_ms(&self) -> u64 {
        let Some(start) = self.started_at else {
            return 0;
        };
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - start).num_milliseconds().max(0) as u64
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, SessionStatus::Running | SessionStatus::Paused)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Running,
    Paused,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}
