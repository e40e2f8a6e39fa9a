//! Ordered lifecycle event stream.
//!
//! Every event is wrapped in an [`EventEnvelope`] carrying the session id and a
//! per-session sequence number. Sequence numbers are assigned and the envelope
//! is broadcast under one mutex, so the receive order always matches `seq`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::executor::types::{TaskId, WorkerId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    SessionStarted {
        total_tasks: usize,
        concurrency: usize,
    },
    TaskReady {
        task_id: TaskId,
    },
    TaskAssigned {
        task_id: TaskId,
        worker_id: WorkerId,
    },
    TaskCompleted {
        task_id: TaskId,
        duration_ms: u64,
    },
    /// Non-terminal executor failure; the task goes back to Ready.
    TaskRetrying {
        task_id: TaskId,
        error: String,
        retry_count: u32,
    },
    /// Terminal failure.
    TaskFailed {
        task_id: TaskId,
        error: String,
        retry_count: u32,
    },
    TaskBlocked {
        task_id: TaskId,
        blocked_by_failure_of: TaskId,
    },
    LockAcquired {
        path: PathBuf,
        task_id: TaskId,
    },
    LockWaiting {
        path: PathBuf,
        task_id: TaskId,
    },
    LockTimeout {
        path: PathBuf,
        task_id: TaskId,
        waited_ms: u64,
    },
    WorkerUnresponsive {
        worker_id: WorkerId,
        last_task_id: Option<TaskId>,
    },
    WorkerRespawned {
        worker_id: WorkerId,
        replaced: WorkerId,
    },
    CheckpointWritten {
        tasks: usize,
    },
    SessionPaused,
    SessionResumed,
    SessionFailed {
        reason: String,
    },
    SessionCompleted {
        completed: usize,
        failed: usize,
        blocked: usize,
        duration_ms: u64,
    },
}

impl EngineEvent {
    /// Task the event is about, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskReady { task_id }
            | Self::TaskAssigned { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskRetrying { task_id, .. }
            | Self::TaskFailed { task_id, .. }
            | Self::TaskBlocked { task_id, .. }
            | Self::LockAcquired { task_id, .. }
            | Self::LockWaiting { task_id, .. }
            | Self::LockTimeout { task_id, .. } => Some(task_id),
            Self::WorkerUnresponsive { last_task_id, .. } => last_task_id.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub session_id: String,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: EngineEvent,
}

struct BusInner {
    tx: broadcast::Sender<EventEnvelope>,
    seqs: Mutex<HashMap<String, u64>>,
}

/// Broadcast hub shared by every session of a manager.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                tx,
                seqs: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.inner.tx.subscribe()
    }

    /// Publish an event and return its sequence number.
    ///
    /// Publishing with no subscribers is not an error.
    pub fn emit(&self, session_id: &str, event: EngineEvent) -> u64 {
        let mut seqs = self
            .inner
            .seqs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let seq = seqs.entry(session_id.to_string()).or_insert(0);
        *seq += 1;
        let envelope = EventEnvelope {
            session_id: session_id.to_string(),
            seq: *seq,
            timestamp: Utc::now(),
            event,
        };
        tracing::trace!(
            target: "parallax.events",
            session_id,
            seq = envelope.seq,
            event = ?envelope.event
        );
        let _ = self.inner.tx.send(envelope);
        *seq
    }

    /// Session-bound emitter.
    pub fn sink(&self, session_id: impl Into<String>) -> EventSink {
        EventSink {
            bus: self.clone(),
            session_id: session_id.into(),
        }
    }

    pub(crate) fn forget_session(&self, session_id: &str) {
        if let Ok(mut seqs) = self.inner.seqs.lock() {
            seqs.remove(session_id);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(4096)
    }
}

/// Emitter bound to one session.
#[derive(Clone)]
pub struct EventSink {
    bus: EventBus,
    session_id: String,
}

impl EventSink {
    pub fn emit(&self, event: EngineEvent) -> u64 {
        self.bus.emit(&self.session_id, event)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequence_numbers_are_per_session() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit("a", EngineEvent::SessionPaused);
        bus.emit("b", EngineEvent::SessionPaused);
        bus.emit("a", EngineEvent::SessionResumed);

        let seqs: Vec<(String, u64)> = (0..3)
            .map(|_| {
                let env = rx.try_recv().unwrap();
                (env.session_id, env.seq)
            })
            .collect();
        assert_eq!(
            seqs,
            vec![("a".into(), 1), ("b".into(), 1), ("a".into(), 2)]
        );
    }

    #[test]
    fn envelope_serializes_flat() {
        let env = EventEnvelope {
            session_id: "s1".into(),
            seq: 7,
            timestamp: Utc::now(),
            event: EngineEvent::TaskAssigned {
                task_id: "build".into(),
                worker_id: 2,
            },
        };
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "task_assigned");
        assert_eq!(json["task_id"], "build");
        assert_eq!(json["worker_id"], 2);
        assert_eq!(json["seq"], 7);
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let bus = EventBus::new(4);
        assert_eq!(bus.emit("s", EngineEvent::SessionPaused), 1);
        assert_eq!(bus.sink("s").emit(EngineEvent::SessionResumed), 2);
    }
}
