use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::executor::types::TaskId;
use crate::state::transitions::TransitionError;

/// Whether the scheduler can keep going after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Contained by requeueing or retrying the task.
    Recoverable,
    /// Stops the task (or the session, at submission time).
    Fatal,
}

/// Stable numeric codes surfaced to hosts (exit codes, event payloads).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    GeneralError = 1,
    ValidationError = 3,
    DependencyError = 11,
    CircularDependency = 12,
    LockTimeout = 30,
    Cancelled = 31,
    LockRevoked = 32,
    ExecutionFailed = 40,
    SessionNotFound = 50,
    InvalidTransition = 51,
    NoLiveWorkers = 52,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// The dependency graph contains a cycle. Ids are listed in traversal order
/// with the first id repeated at the end.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("circular dependency detected: {}", .cycle.join(" -> "))]
pub struct CycleError {
    pub cycle: Vec<TaskId>,
}

/// Rejected task submission. Nothing has been scheduled when this is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("duplicate task id: {0}")]
    DuplicateTaskId(TaskId),

    #[error("dependency not found: task '{task_id}' depends on '{missing_dep}'")]
    DependencyNotFound { task_id: TaskId, missing_dep: TaskId },

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("invalid engine config: {0}")]
    InvalidConfig(String),
}

impl SubmitError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::DuplicateTaskId(_) => ErrorCode::ValidationError,
            Self::DependencyNotFound { .. } => ErrorCode::DependencyError,
            Self::Cycle(_) => ErrorCode::CircularDependency,
            Self::InvalidConfig(_) => ErrorCode::ValidationError,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Fatal
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("timed out after {}ms waiting for lock on {}", .waited.as_millis(), .path.display())]
    Timeout { path: PathBuf, waited: Duration },

    #[error("lock holder '{0}' was revoked")]
    Revoked(TaskId),
}

impl LockError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockTimeout,
            Self::Revoked(_) => ErrorCode::LockRevoked,
        }
    }

    /// Lock contention never fails a task.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Recoverable
    }
}

/// Failure reported by a `WorkExecutor`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ExecutionError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl ExecutionError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Failed(_) | Self::Io(_) => ErrorCode::ExecutionFailed,
            Self::Cancelled => ErrorCode::Cancelled,
        }
    }

    /// Execution failures are retried until the retry budget runs out.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Failed(_) | Self::Io(_) => ErrorKind::Recoverable,
            Self::Cancelled => ErrorKind::Fatal,
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("session {0} is already running")]
    AlreadyRunning(String),

    #[error("session {0} has no live workers left")]
    NoLiveWorkers(String),

    #[error("unknown task id: {0}")]
    UnknownTask(TaskId),

    #[error(transparent)]
    Submit(#[from] SubmitError),
}

impl SessionError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::SessionNotFound,
            Self::InvalidTransition(_) => ErrorCode::InvalidTransition,
            Self::AlreadyRunning(_) => ErrorCode::InvalidTransition,
            Self::NoLiveWorkers(_) => ErrorCode::NoLiveWorkers,
            Self::UnknownTask(_) => ErrorCode::ValidationError,
            Self::Submit(e) => e.error_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_lists_path() {
        let err = CycleError {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "circular dependency detected: a -> b -> a");
        assert_eq!(
            SubmitError::from(err).error_code(),
            ErrorCode::CircularDependency
        );
    }

    #[test]
    fn lock_errors_are_recoverable() {
        let err = LockError::Timeout {
            path: PathBuf::from("src/lib.rs"),
            waited: Duration::from_millis(250),
        };
        assert_eq!(err.kind(), ErrorKind::Recoverable);
        assert_eq!(err.error_code().as_u16(), 30);
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn io_error_converts_to_execution_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing binary");
        let err: ExecutionError = io.into();
        assert_eq!(err, ExecutionError::Io("missing binary".to_string()));
        assert_eq!(err.kind(), ErrorKind::Recoverable);
        assert_eq!(ExecutionError::Cancelled.kind(), ErrorKind::Fatal);
    }
}
