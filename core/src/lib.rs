//! Dependency-aware parallel task orchestration.
//!
//! A [`SessionManager`] validates a task graph, runs it on a pool of workers
//! under file-level locks, detects dead workers by heartbeat and redistributes
//! their work, and reports every state change on an ordered [`EventBus`].

pub mod config;
pub mod error;
pub mod events;
pub mod events_out;
pub mod executor;
pub mod state;

pub use error::{ErrorCode, ExecutionError, LockError, SessionError, SubmitError};
pub use events::{EngineEvent, EventBus, EventEnvelope};
pub use executor::{
    EngineConfig, FileDecl, LockMode, SessionReport, TaskId, TaskOutcome, TaskSpec, TaskStatus,
    WorkContext, WorkExecutor, WorkOutput, WorkerId,
};
pub use state::{Checkpoint, Session, SessionManager, SessionStatus};
