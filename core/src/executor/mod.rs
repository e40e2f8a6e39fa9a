//! Parallel task execution engine.
//!
//! Runs a DAG of tasks on a fixed pool of long-lived workers while keeping
//! concurrent tasks off each other's files:
//! - Dependency graph validation (duplicates, unknown dependencies, cycles)
//! - FIFO ready queue feeding idle workers
//! - Per-path shared/exclusive file locks with bounded waits
//! - Heartbeat-based detection of dead workers and task redistribution
//! - Bounded retries with Blocked propagation to dependents
//!
//! # Architecture
//!
//! ```text
//! Vec<TaskSpec<P>> + edges
//!   ↓
//! DependencyGraph::submit() → duplicates, unknown deps, detect_cycle()
//!   ↓
//! SessionEngine::run()
//!   ├─ ready queue ──▶ WorkerPool ──mpsc──▶ worker_loop (heartbeat ticker)
//!   │                                          ↓
//!   │                      FileLockManager::acquire() → WorkExecutor::run()
//!   │                                          ↓
//!   ├─ complete_assignment() ◀──── WorkerReport
//!   └─ HealthMonitor::watch() → redistribute() on missed heartbeats
//!   ↓
//! SessionReport
//! ```

pub(crate) mod engine;
pub mod graph;
pub mod health;
pub mod lock;
pub mod pool;
pub mod traits;
pub mod types;

pub use graph::{DependencyGraph, StatusCounts};
pub use health::HealthMonitor;
pub use lock::{normalize_path, FileLockManager, LockHolder, LockRecord, LockSet};
pub use pool::{Worker, WorkerStatus};
pub use traits::{
    CheckpointStore, MemoryCheckpointStore, WorkContext, WorkExecutor, WorkOutput,
    WorktreeProvisioner,
};
pub use types::{
    EngineConfig, FileDecl, LockMode, SessionReport, TaskId, TaskLike, TaskOutcome, TaskSpec,
    TaskStatus, WorkerId,
};
