//! Session registry and control surface.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;

use super::session::Session;
use super::snapshot::Checkpoint;
use crate::error::{SessionError, SubmitError};
use crate::events::{EventBus, EventEnvelope};
use crate::executor::engine::SessionEngine;
use crate::executor::graph::DependencyGraph;
use crate::executor::pool::Worker;
use crate::executor::traits::{CheckpointStore, WorkExecutor, WorktreeProvisioner};
use crate::executor::types::{EngineConfig, SessionReport, TaskId, TaskSpec, TaskStatus, WorkerId};

/// Owns every session of one host and the event bus they publish on.
///
/// Cheap to clone; clones share the same registry.
pub struct SessionManager<E: WorkExecutor> {
    inner: Arc<ManagerInner<E>>,
}

struct ManagerInner<E: WorkExecutor> {
    config: EngineConfig,
    executor: Arc<E>,
    bus: EventBus,
    provisioner: Option<Arc<dyn WorktreeProvisioner>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    sessions: RwLock<HashMap<String, Arc<SessionEngine<E>>>>,
}

impl<E: WorkExecutor> Clone for SessionManager<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub struct SessionManagerBuilder<E: WorkExecutor> {
    config: EngineConfig,
    executor: Arc<E>,
    bus: Option<EventBus>,
    provisioner: Option<Arc<dyn WorktreeProvisioner>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
}

impl<E: WorkExecutor> SessionManagerBuilder<E> {
    /// Publish on an existing bus instead of creating one.
    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn provisioner(mut self, provisioner: Arc<dyn WorktreeProvisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn build(self) -> Result<SessionManager<E>, SubmitError> {
        self.config.validate()?;
        let bus = self
            .bus
            .unwrap_or_else(|| EventBus::new(self.config.event_capacity));
        Ok(SessionManager {
            inner: Arc::new(ManagerInner {
                config: self.config,
                executor: self.executor,
                bus,
                provisioner: self.provisioner,
                checkpoints: self.checkpoints,
                sessions: RwLock::new(HashMap::new()),
            }),
        })
    }
}

impl<E: WorkExecutor> SessionManager<E> {
    pub fn new(config: EngineConfig, executor: E) -> Result<Self, SubmitError> {
        Self::builder(config, executor).build()
    }

    pub fn builder(config: EngineConfig, executor: E) -> SessionManagerBuilder<E> {
        SessionManagerBuilder {
            config,
            executor: Arc::new(executor),
            bus: None,
            provisioner: None,
            checkpoints: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Subscribe to events of every session. Subscribe before `run` to see
    /// a session from its first event.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.inner.bus.subscribe()
    }

    /// Validate the graph and register a new session. Nothing runs until
    /// [`SessionManager::run`].
    pub fn create_session(
        &self,
        tasks: Vec<TaskSpec<E::Payload>>,
        edges: &[(TaskId, TaskId)],
        concurrency: usize,
    ) -> Result<String, SubmitError> {
        if concurrency == 0 {
            return Err(SubmitError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        let graph = DependencyGraph::submit(&tasks, edges)?;
        let session = Session::new(concurrency, graph.len());
        let session_id = session.id.clone();

        let engine = SessionEngine::new(
            session,
            tasks,
            graph,
            self.inner.config.clone(),
            Arc::clone(&self.inner.executor),
            &self.inner.bus,
            self.inner.provisioner.clone(),
            self.inner.checkpoints.clone(),
        );
        self.sessions_mut()
            .insert(session_id.clone(), Arc::new(engine));

        tracing::info!(session_id = %session_id, concurrency, "session created");
        Ok(session_id)
    }

    /// Run a session until every task is terminal or the session is aborted.
    pub async fn run(&self, session_id: &str) -> Result<SessionReport, SessionError> {
        let engine = self.engine(session_id)?;
        engine.run().await
    }

    /// Stop dispatching new tasks and write a checkpoint.
    pub async fn pause(&self, session_id: &str) -> Result<Checkpoint, SessionError> {
        self.engine(session_id)?.pause().await
    }

    pub fn resume(&self, session_id: &str) -> Result<(), SessionError> {
        self.engine(session_id)?.resume()
    }

    /// Cancel in-flight work and fail the session.
    pub fn abort(&self, session_id: &str, reason: &str) -> Result<(), SessionError> {
        self.engine(session_id)?.abort(reason)
    }

    /// Take a checkpoint now and hand it to the checkpoint store, if any.
    pub async fn checkpoint(&self, session_id: &str) -> Result<Checkpoint, SessionError> {
        let engine = self.engine(session_id)?;
        let checkpoint = engine.checkpoint();
        engine.persist(&checkpoint).await;
        Ok(checkpoint)
    }

    /// Treat `completed` as already done. Only valid before `run`.
    pub fn reconcile_completed(
        &self,
        session_id: &str,
        completed: &[TaskId],
    ) -> Result<usize, SessionError> {
        self.engine(session_id)?.reconcile(completed, true)
    }

    /// Carry over completed tasks from an earlier session's checkpoint.
    /// Tasks the current graph no longer has are skipped.
    pub fn reconcile_from_checkpoint(
        &self,
        session_id: &str,
        checkpoint: &Checkpoint,
    ) -> Result<usize, SessionError> {
        self.engine(session_id)?
            .reconcile(&checkpoint.completed_tasks(), false)
    }

    pub fn session(&self, session_id: &str) -> Result<Session, SessionError> {
        Ok(self.engine(session_id)?.session())
    }

    pub fn list_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions().values().map(|e| e.session()).collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    pub fn report(&self, session_id: &str) -> Result<SessionReport, SessionError> {
        Ok(self.engine(session_id)?.report())
    }

    pub fn task_status(
        &self,
        session_id: &str,
        task_id: &str,
    ) -> Result<Option<TaskStatus>, SessionError> {
        Ok(self.engine(session_id)?.task_status(task_id))
    }

    /// Parallel stages of the session's graph.
    pub fn stages(&self, session_id: &str) -> Result<Vec<Vec<TaskId>>, SessionError> {
        Ok(self.engine(session_id)?.stages())
    }

    pub fn workers(&self, session_id: &str) -> Result<Vec<Worker>, SessionError> {
        Ok(self.engine(session_id)?.workers())
    }

    /// Abruptly stop a worker, as if the process behind it crashed. The
    /// health monitor notices the silence and redistributes its task.
    pub fn kill_worker(&self, session_id: &str, worker_id: WorkerId) -> Result<bool, SessionError> {
        Ok(self.engine(session_id)?.kill_worker(worker_id))
    }

    /// Drop a session that is no longer running. Only its checkpoints
    /// outlive it.
    pub fn remove_session(&self, session_id: &str) -> Result<Session, SessionError> {
        let session = self.engine(session_id)?.session();
        if session.is_active() {
            return Err(SessionError::AlreadyRunning(session_id.to_string()));
        }
        self.sessions_mut().remove(session_id);
        self.inner.bus.forget_session(session_id);
        tracing::debug!(session_id, "session removed");
        Ok(session)
    }

    fn engine(&self, session_id: &str) -> Result<Arc<SessionEngine<E>>, SessionError> {
        self.sessions()
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    fn sessions(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<SessionEngine<E>>>> {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sessions_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<SessionEngine<E>>>> {
        self.inner
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
