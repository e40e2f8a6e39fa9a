//! Per-session scheduler.
//!
//! Graph, worker table, ready queue and session record share one mutex.
//! Every state change and the event describing it happen under that mutex,
//! so subscribers see a causal order. Lock order is always
//! engine state -> lock table -> event bus.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{ExecutionError, LockError, SessionError};
use crate::events::{EngineEvent, EventBus, EventSink};
use crate::state::transitions::TransitionError;
use crate::state::{Checkpoint, Session, SessionStatus, TaskCheckpoint};

use super::graph::DependencyGraph;
use super::health::HealthMonitor;
use super::lock::{FileLockManager, LockHolder};
use super::pool::{Assignment, Worker, WorkerPool, WorkerStatus};
use super::traits::{CheckpointStore, WorkContext, WorkExecutor, WorkOutput, WorktreeProvisioner};
use super::types::{
    EngineConfig, FileDecl, SessionReport, TaskId, TaskOutcome, TaskSpec, TaskStatus, WorkerId,
};

/// What a worker hands back for one assignment.
#[derive(Debug)]
pub(crate) enum WorkerReport {
    Finished {
        result: Result<WorkOutput, ExecutionError>,
        duration: Duration,
    },
    LockFailed(LockError),
    /// The assignment was redistributed before the worker got going.
    Superseded,
}

/// Why a session stops before its graph is finished.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Halt {
    Aborted(String),
    NoLiveWorkers,
}

impl Halt {
    fn reason(&self) -> String {
        match self {
            Self::Aborted(reason) => reason.clone(),
            Self::NoLiveWorkers => "no live workers remain".to_string(),
        }
    }
}

enum Step {
    Continue,
    Finished,
    Halted(Halt),
}

#[derive(Debug, Default)]
struct OutcomeNotes {
    duration_ms: Option<u64>,
    error: Option<String>,
    output: Option<String>,
    blocked_by: Option<TaskId>,
}

struct EngineState {
    session: Session,
    graph: DependencyGraph,
    pool: WorkerPool,
    ready: VecDeque<TaskId>,
    notes: HashMap<TaskId, OutcomeNotes>,
    next_dispatch: u64,
    checkpoint_seq: u64,
    halt: Option<Halt>,
    report: Option<SessionReport>,
}

pub(crate) struct SessionEngine<E: WorkExecutor> {
    id: String,
    config: EngineConfig,
    tasks: HashMap<TaskId, TaskSpec<E::Payload>>,
    state: Mutex<EngineState>,
    locks: FileLockManager,
    events: EventSink,
    executor: Arc<E>,
    provisioner: Option<Arc<dyn WorktreeProvisioner>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    progress: Notify,
    cancel: CancellationToken,
}

impl<E: WorkExecutor> SessionEngine<E> {
    pub(crate) fn new(
        session: Session,
        tasks: Vec<TaskSpec<E::Payload>>,
        graph: DependencyGraph,
        config: EngineConfig,
        executor: Arc<E>,
        bus: &EventBus,
        provisioner: Option<Arc<dyn WorktreeProvisioner>>,
        checkpoints: Option<Arc<dyn CheckpointStore>>,
    ) -> Self {
        let events = bus.sink(session.id.clone());
        Self {
            id: session.id.clone(),
            config,
            tasks: tasks.into_iter().map(|t| (t.id.clone(), t)).collect(),
            state: Mutex::new(EngineState {
                session,
                graph,
                pool: WorkerPool::new(),
                ready: VecDeque::new(),
                notes: HashMap::new(),
                next_dispatch: 0,
                checkpoint_seq: 0,
                halt: None,
                report: None,
            }),
            locks: FileLockManager::with_events(events.clone()),
            events,
            executor,
            provisioner,
            checkpoints,
            progress: Notify::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn session(&self) -> Session {
        self.state().session.clone()
    }

    pub(crate) fn task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.state().graph.status(task_id)
    }

    pub(crate) fn workers(&self) -> Vec<Worker> {
        self.state().pool.workers()
    }

    pub(crate) fn stages(&self) -> Vec<Vec<TaskId>> {
        self.state().graph.stages()
    }

    /// Final report once the session has ended, otherwise a live one.
    pub(crate) fn report(&self) -> SessionReport {
        let st = self.state();
        match &st.report {
            Some(report) => report.clone(),
            None => self.build_report(&st),
        }
    }

    /// Mark tasks Completed before the session starts. Unknown ids are an
    /// error when `strict`, otherwise skipped.
    pub(crate) fn reconcile(&self, ids: &[TaskId], strict: bool) -> Result<usize, SessionError> {
        let mut st = self.state();
        match st.session.status {
            SessionStatus::Initializing => {}
            SessionStatus::Running | SessionStatus::Paused => {
                return Err(SessionError::AlreadyRunning(self.id.clone()))
            }
            state => return Err(TransitionError::FromTerminalState { state }.into()),
        }
        if strict {
            if let Some(unknown) = ids.iter().find(|id| !st.graph.contains(id)) {
                return Err(SessionError::UnknownTask(unknown.clone()));
            }
        }

        let mut applied = 0;
        for id in ids {
            match st.graph.status(id) {
                None => {
                    tracing::warn!(session_id = %self.id, task_id = %id, "skipping unknown task during reconciliation");
                }
                Some(TaskStatus::Completed) => {}
                Some(_) => {
                    st.graph.mark_completed(id);
                    applied += 1;
                }
            }
        }
        tracing::info!(session_id = %self.id, applied, "reconciled completed tasks");
        Ok(applied)
    }

    /// Drive the session to completion (or abort).
    pub(crate) async fn run(self: &Arc<Self>) -> Result<SessionReport, SessionError> {
        self.start()?;

        let monitor = tokio::spawn(HealthMonitor::from_config(&self.config).watch(Arc::clone(self)));
        let mut checkpoints = self.config.checkpoint_interval().map(|every| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        // Fallback wake-up in case a notification races the loop.
        let idle_tick = self.config.heartbeat_interval();

        let halt = loop {
            match self.step() {
                Step::Continue => {}
                Step::Finished => break None,
                Step::Halted(halt) => break Some(halt),
            }
            tokio::select! {
                _ = self.progress.notified() => {}
                _ = tokio::time::sleep(idle_tick) => {}
                _ = next_tick(&mut checkpoints) => self.spawn_checkpoint(),
            }
        };

        if let Some(halt) = &halt {
            self.drain(&halt.reason()).await;
        }
        monitor.abort();

        let report = self.finish(halt.clone()).await;
        match halt {
            Some(Halt::NoLiveWorkers) => Err(SessionError::NoLiveWorkers(self.id.clone())),
            _ => Ok(report),
        }
    }

    fn start(self: &Arc<Self>) -> Result<(), SessionError> {
        let mut st = self.state();
        if st.session.is_active() {
            return Err(SessionError::AlreadyRunning(self.id.clone()));
        }
        st.session.transition_to(SessionStatus::Running)?;

        let size = st.session.concurrency;
        st.pool.start(size, self);
        self.events.emit(EngineEvent::SessionStarted {
            total_tasks: st.graph.len(),
            concurrency: size,
        });
        tracing::info!(
            session_id = %self.id,
            tasks = st.graph.len(),
            concurrency = size,
            executor = self.executor.name(),
            "session started"
        );

        for task_id in st.graph.seed_ready() {
            st.ready.push_back(task_id.clone());
            self.events.emit(EngineEvent::TaskReady { task_id });
        }
        Ok(())
    }

    fn step(self: &Arc<Self>) -> Step {
        let mut st = self.state();
        if let Some(halt) = &st.halt {
            return Step::Halted(halt.clone());
        }
        // A paused session completes only after it is resumed.
        if st.graph.is_finished() && st.session.status == SessionStatus::Running {
            return Step::Finished;
        }
        if st.pool.live_count() == 0 {
            st.halt = Some(Halt::NoLiveWorkers);
            return Step::Halted(Halt::NoLiveWorkers);
        }
        self.dispatch(&mut st);
        Step::Continue
    }

    /// Hand Ready tasks to idle workers in FIFO order.
    fn dispatch(self: &Arc<Self>, st: &mut EngineState) {
        if st.session.status != SessionStatus::Running {
            return;
        }
        while let Some(worker_id) = st.pool.idle_worker() {
            let Some(task_id) = st.ready.pop_front() else {
                break;
            };
            if !st.graph.mark_assigned(&task_id) {
                continue;
            }
            st.next_dispatch += 1;
            let assignment = Assignment {
                task_id: task_id.clone(),
                dispatch: st.next_dispatch,
                attempt: st.graph.retry_count(&task_id).unwrap_or(0),
            };
            match st.pool.assign(worker_id, assignment) {
                Ok(()) => {
                    tracing::debug!(session_id = %self.id, task_id = %task_id, worker_id, "task assigned");
                    self.events.emit(EngineEvent::TaskAssigned { task_id, worker_id });
                }
                Err(assignment) => {
                    // The worker task is gone; nothing was delivered.
                    st.graph.requeue(&assignment.task_id);
                    st.ready.push_front(assignment.task_id);
                    st.pool.retire(worker_id, WorkerStatus::Terminated);
                    self.events.emit(EngineEvent::WorkerUnresponsive {
                        worker_id,
                        last_task_id: None,
                    });
                    self.respawn(st, worker_id);
                }
            }
        }
    }

    /// Worker side of an assignment: provision, lock, run, unlock.
    pub(crate) async fn execute(&self, worker_id: WorkerId, assignment: &Assignment) -> WorkerReport {
        // Also orders this worker behind the dispatcher's TaskAssigned.
        let current = self.state().pool.is_current(worker_id, assignment.dispatch);
        if !current {
            return WorkerReport::Superseded;
        }
        let Some(task) = self.tasks.get(&assignment.task_id) else {
            return WorkerReport::Superseded;
        };

        let root = match &self.provisioner {
            Some(provisioner) => match provisioner.provision(&self.id, &task.id).await {
                Ok(root) => Some(root),
                Err(err) => {
                    return WorkerReport::Finished {
                        result: Err(ExecutionError::Io(format!("provisioning failed: {err:#}"))),
                        duration: Duration::ZERO,
                    }
                }
            },
            None => None,
        };

        let report = self
            .attempt(worker_id, assignment, task, root.as_deref())
            .await;

        if let (Some(provisioner), Some(root)) = (&self.provisioner, &root) {
            if let Err(err) = provisioner.release(&self.id, &task.id, root).await {
                tracing::warn!(
                    session_id = %self.id,
                    task_id = %task.id,
                    provisioner = provisioner.name(),
                    "failed to release worktree: {err:#}"
                );
            }
        }
        report
    }

    async fn attempt(
        &self,
        worker_id: WorkerId,
        assignment: &Assignment,
        task: &TaskSpec<E::Payload>,
        root: Option<&Path>,
    ) -> WorkerReport {
        let files: Vec<FileDecl> = task
            .declared_files
            .iter()
            .map(|decl| FileDecl {
                path: resolve_under(root, &decl.path),
                mode: decl.mode,
            })
            .collect();
        let holder = LockHolder::new(task.id.clone(), assignment.dispatch);

        let acquired = tokio::select! {
            acquired = self.locks.acquire(&files, holder.clone(), self.config.lock_timeout()) => acquired,
            _ = self.cancel.cancelled() => {
                // Drop anything taken before the cancellation.
                self.locks.revoke(&holder);
                return WorkerReport::Finished {
                    result: Err(ExecutionError::Cancelled),
                    duration: Duration::ZERO,
                };
            }
        };
        let locks = match acquired {
            Ok(locks) => locks,
            Err(err) => return WorkerReport::LockFailed(err),
        };

        if !self.mark_running(worker_id, assignment) {
            self.locks.release(locks);
            return WorkerReport::Superseded;
        }

        let ctx = WorkContext {
            session_id: self.id.clone(),
            worker_id,
            attempt: assignment.attempt,
            root: root.map(Path::to_path_buf),
            cancel: self.cancel.child_token(),
        };
        let started = Instant::now();
        let result = self.executor.run(task, ctx).await;
        let duration = started.elapsed();

        self.locks.release(locks);
        WorkerReport::Finished { result, duration }
    }

    fn mark_running(&self, worker_id: WorkerId, assignment: &Assignment) -> bool {
        let mut st = self.state();
        st.pool.is_current(worker_id, assignment.dispatch) && st.graph.mark_running(&assignment.task_id)
    }

    pub(crate) fn heartbeat(&self, worker_id: WorkerId) {
        self.state().pool.heartbeat(worker_id);
    }

    /// Apply a worker's report. Reports from superseded dispatches are
    /// dropped.
    pub(crate) fn complete_assignment(
        &self,
        worker_id: WorkerId,
        assignment: Assignment,
        report: WorkerReport,
    ) {
        let mut st = self.state();
        let completed = matches!(report, WorkerReport::Finished { result: Ok(_), .. });
        if !st.pool.finish(worker_id, assignment.dispatch, completed) {
            tracing::debug!(
                session_id = %self.id,
                task_id = %assignment.task_id,
                worker_id,
                dispatch = assignment.dispatch,
                "ignoring stale worker report"
            );
            return;
        }

        let task_id = assignment.task_id;
        match report {
            WorkerReport::Superseded => {
                if st.graph.requeue(&task_id) {
                    self.enqueue(&mut st, task_id);
                }
            }
            WorkerReport::LockFailed(err) => {
                // Contention does not consume a retry.
                st.graph.requeue(&task_id);
                st.notes.entry(task_id.clone()).or_default().error = Some(err.to_string());
                self.enqueue(&mut st, task_id);
            }
            WorkerReport::Finished {
                result: Ok(output),
                duration,
            } => {
                let duration_ms = duration.as_millis() as u64;
                let newly_ready = st.graph.mark_completed(&task_id);
                let notes = st.notes.entry(task_id.clone()).or_default();
                notes.duration_ms = Some(duration_ms);
                notes.output = Some(output.text);
                notes.error = None;

                tracing::info!(session_id = %self.id, task_id = %task_id, duration_ms, "task completed");
                self.events.emit(EngineEvent::TaskCompleted {
                    task_id,
                    duration_ms,
                });
                for ready in newly_ready {
                    self.enqueue(&mut st, ready);
                }
            }
            WorkerReport::Finished {
                result: Err(ExecutionError::Cancelled),
                ..
            } => {
                self.fail_task(&mut st, &task_id, ExecutionError::Cancelled.to_string());
            }
            WorkerReport::Finished {
                result: Err(err), ..
            } => {
                let error = err.to_string();
                if let Some(reason) = st.halt.as_ref().map(Halt::reason) {
                    // No retries once the session is winding down.
                    self.fail_task(&mut st, &task_id, format!("session aborted: {reason}"));
                } else if st.graph.retry_count(&task_id).unwrap_or(0) >= self.config.max_retries {
                    self.fail_task(&mut st, &task_id, error);
                } else {
                    let retry_count = st.graph.record_retry(&task_id);
                    st.graph.requeue(&task_id);
                    st.notes.entry(task_id.clone()).or_default().error = Some(error.clone());
                    tracing::warn!(
                        session_id = %self.id,
                        task_id = %task_id,
                        retry_count,
                        max_retries = self.config.max_retries,
                        "task failed, retrying: {error}"
                    );
                    self.events.emit(EngineEvent::TaskRetrying {
                        task_id: task_id.clone(),
                        error,
                        retry_count,
                    });
                    self.enqueue(&mut st, task_id);
                }
            }
        }
        drop(st);
        self.progress.notify_one();
    }

    fn enqueue(&self, st: &mut EngineState, task_id: TaskId) {
        st.ready.push_back(task_id.clone());
        self.events.emit(EngineEvent::TaskReady { task_id });
    }

    /// Terminal failure plus Blocked cascade.
    fn fail_task(&self, st: &mut EngineState, task_id: &str, error: String) {
        let retry_count = st.graph.retry_count(task_id).unwrap_or(0);
        let blocked = st.graph.mark_failed(task_id);
        st.notes.entry(task_id.to_string()).or_default().error = Some(error.clone());

        tracing::warn!(
            session_id = %self.id,
            task_id,
            retry_count,
            blocked = blocked.len(),
            "task failed: {error}"
        );
        self.events.emit(EngineEvent::TaskFailed {
            task_id: task_id.to_string(),
            error,
            retry_count,
        });
        for id in blocked {
            st.notes.entry(id.clone()).or_default().blocked_by = Some(task_id.to_string());
            self.events.emit(EngineEvent::TaskBlocked {
                task_id: id,
                blocked_by_failure_of: task_id.to_string(),
            });
        }
    }

    /// One health scan; called by the monitor task.
    pub(crate) fn check_health(self: &Arc<Self>, monitor: &HealthMonitor) {
        let mut st = self.state();
        if st.halt.is_some() || st.session.status.is_terminal() {
            return;
        }
        let stale = monitor.scan(st.pool.live(), Instant::now());
        for worker_id in stale {
            tracing::warn!(
                session_id = %self.id,
                worker_id,
                timeout_ms = monitor.timeout().as_millis() as u64,
                "worker missed heartbeats"
            );
            self.redistribute(&mut st, worker_id);
        }
    }

    /// Retire an unresponsive worker, free its locks and put its task back.
    fn redistribute(self: &Arc<Self>, st: &mut EngineState, worker_id: WorkerId) {
        let current = st.pool.retire(worker_id, WorkerStatus::Unresponsive);
        self.events.emit(EngineEvent::WorkerUnresponsive {
            worker_id,
            last_task_id: current.as_ref().map(|a| a.task_id.clone()),
        });

        if let Some(assignment) = current {
            let revoked = self
                .locks
                .revoke(&LockHolder::new(assignment.task_id.clone(), assignment.dispatch));
            if !revoked.is_empty() {
                tracing::info!(
                    session_id = %self.id,
                    task_id = %assignment.task_id,
                    paths = ?revoked,
                    "revoked locks of unresponsive worker"
                );
            }

            let task_id = assignment.task_id;
            let error = format!("worker {worker_id} became unresponsive");
            if st.graph.retry_count(&task_id).unwrap_or(0) >= self.config.max_retries {
                self.fail_task(st, &task_id, error);
            } else {
                st.graph.record_retry(&task_id);
                st.graph.requeue(&task_id);
                st.notes.entry(task_id.clone()).or_default().error = Some(error);
                self.enqueue(st, task_id);
            }
        }

        self.respawn(st, worker_id);
        self.progress.notify_one();
    }

    fn respawn(self: &Arc<Self>, st: &mut EngineState, replaced: WorkerId) {
        if !self.config.respawn_workers || st.halt.is_some() {
            return;
        }
        let worker_id = st.pool.spawn(self);
        tracing::info!(session_id = %self.id, worker_id, replaced, "worker respawned");
        self.events.emit(EngineEvent::WorkerRespawned {
            worker_id,
            replaced,
        });
    }

    /// Abort a worker's tokio task without any cleanup.
    pub(crate) fn kill_worker(&self, worker_id: WorkerId) -> bool {
        self.state().pool.kill(worker_id)
    }

    /// Stop dispatching; in-flight tasks keep running.
    pub(crate) async fn pause(&self) -> Result<Checkpoint, SessionError> {
        let checkpoint = {
            let mut st = self.state();
            st.session.transition_to(SessionStatus::Paused)?;
            self.events.emit(EngineEvent::SessionPaused);
            tracing::info!(session_id = %self.id, "session paused");
            self.take_checkpoint(&mut st)
        };
        self.persist(&checkpoint).await;
        Ok(checkpoint)
    }

    pub(crate) fn resume(&self) -> Result<(), SessionError> {
        {
            let mut st = self.state();
            if st.session.status != SessionStatus::Paused {
                return Err(TransitionError::InvalidTransition {
                    from: st.session.status,
                    to: SessionStatus::Running,
                }
                .into());
            }
            st.session.transition_to(SessionStatus::Running)?;
            self.events.emit(EngineEvent::SessionResumed);
            tracing::info!(session_id = %self.id, "session resumed");
        }
        self.progress.notify_one();
        Ok(())
    }

    /// Request an abort. A session that never started fails immediately;
    /// a running one is wound down by its run loop.
    pub(crate) fn abort(&self, reason: &str) -> Result<(), SessionError> {
        {
            let mut st = self.state();
            match st.session.status {
                SessionStatus::Initializing => {
                    st.session.transition_to(SessionStatus::Failed)?;
                    st.session.failure = Some(reason.to_string());
                    self.events.emit(EngineEvent::SessionFailed {
                        reason: reason.to_string(),
                    });
                    return Ok(());
                }
                SessionStatus::Running | SessionStatus::Paused => {
                    if st.halt.is_none() {
                        st.halt = Some(Halt::Aborted(reason.to_string()));
                    }
                }
                state => return Err(TransitionError::FromTerminalState { state }.into()),
            }
        }
        tracing::warn!(session_id = %self.id, reason, "session abort requested");
        self.cancel.cancel();
        self.progress.notify_one();
        Ok(())
    }

    /// Give in-flight executors the grace period to honor cancellation,
    /// then force-terminate whatever is still busy.
    async fn drain(&self, reason: &str) {
        self.cancel.cancel();
        let deadline = tokio::time::Instant::now() + self.config.cancel_grace();
        loop {
            let busy = self.state().pool.busy_workers().len();
            if busy == 0 {
                break;
            }
            tokio::select! {
                _ = self.progress.notified() => {}
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        let mut st = self.state();
        for worker_id in st.pool.busy_workers() {
            let Some(assignment) = st.pool.retire(worker_id, WorkerStatus::Terminated) else {
                continue;
            };
            tracing::warn!(
                session_id = %self.id,
                task_id = %assignment.task_id,
                worker_id,
                "force-terminating worker after cancel grace"
            );
            self.events.emit(EngineEvent::WorkerUnresponsive {
                worker_id,
                last_task_id: Some(assignment.task_id.clone()),
            });
            self.locks
                .revoke(&LockHolder::new(assignment.task_id.clone(), assignment.dispatch));
            self.fail_task(&mut st, &assignment.task_id, format!("session aborted: {reason}"));
        }
    }

    async fn finish(&self, halt: Option<Halt>) -> SessionReport {
        let (report, checkpoint, halt) = {
            let mut st = self.state();
            st.pool.shutdown();
            // An abort accepted after the last step still wins.
            let halt = halt.or_else(|| st.halt.clone());
            let status = if halt.is_some() {
                SessionStatus::Failed
            } else {
                SessionStatus::Completed
            };
            if let Err(err) = st.session.transition_to(status) {
                tracing::warn!(session_id = %self.id, "unexpected session state at finish: {err}");
            }
            st.session.failure = halt.as_ref().map(Halt::reason);
            let checkpoint = self.take_checkpoint(&mut st);
            let report = self.build_report(&st);
            st.report = Some(report.clone());
            (report, checkpoint, halt)
        };

        self.persist(&checkpoint).await;

        match halt {
            Some(halt) => {
                tracing::error!(session_id = %self.id, reason = %halt.reason(), "session failed");
                self.events.emit(EngineEvent::SessionFailed {
                    reason: halt.reason(),
                });
            }
            None => {
                tracing::info!(
                    session_id = %self.id,
                    completed = report.completed_count,
                    failed = report.failed_count,
                    blocked = report.blocked_count,
                    duration_ms = report.wall_clock_duration_ms,
                    "session completed"
                );
                self.events.emit(EngineEvent::SessionCompleted {
                    completed: report.completed_count,
                    failed: report.failed_count,
                    blocked: report.blocked_count,
                    duration_ms: report.wall_clock_duration_ms,
                });
            }
        }
        report
    }

    fn build_report(&self, st: &EngineState) -> SessionReport {
        let mut report = SessionReport {
            session_id: self.id.clone(),
            status: st.session.status,
            failure: st.session.failure.clone(),
            completed_count: 0,
            failed_count: 0,
            blocked_count: 0,
            unfinished_count: 0,
            lock_contention_events: self.locks.contention_events(),
            wall_clock_duration_ms: st.session.duration_ms(),
            completed: Vec::new(),
            failed: Vec::new(),
            blocked: Vec::new(),
            unfinished: Vec::new(),
            outcomes: BTreeMap::new(),
        };

        for (id, status, retry_count) in st.graph.statuses() {
            let bucket = match status {
                TaskStatus::Completed => &mut report.completed,
                TaskStatus::Failed => &mut report.failed,
                TaskStatus::Blocked => &mut report.blocked,
                _ => &mut report.unfinished,
            };
            bucket.push(id.to_string());

            let notes = st.notes.get(id);
            report.outcomes.insert(
                id.to_string(),
                TaskOutcome {
                    status,
                    retry_count,
                    duration_ms: notes.and_then(|n| n.duration_ms),
                    error: notes.and_then(|n| n.error.clone()),
                    output: notes.and_then(|n| n.output.clone()),
                    blocked_by: notes.and_then(|n| n.blocked_by.clone()),
                },
            );
        }

        report.completed_count = report.completed.len();
        report.failed_count = report.failed.len();
        report.blocked_count = report.blocked.len();
        report.unfinished_count = report.unfinished.len();
        report
    }

    /// Capture a checkpoint of the current state.
    pub(crate) fn checkpoint(&self) -> Checkpoint {
        let mut st = self.state();
        self.take_checkpoint(&mut st)
    }

    fn take_checkpoint(&self, st: &mut EngineState) -> Checkpoint {
        st.checkpoint_seq += 1;
        let tasks = st
            .graph
            .statuses()
            .map(|(id, status, retry_count)| TaskCheckpoint {
                id: id.to_string(),
                status,
                retry_count,
            })
            .collect();
        Checkpoint::new(
            self.id.clone(),
            st.checkpoint_seq,
            st.session.status,
            tasks,
            self.locks.snapshot(),
        )
    }

    /// Write a checkpoint without holding up the scheduler.
    fn spawn_checkpoint(self: &Arc<Self>) {
        if self.checkpoints.is_none() {
            return;
        }
        let checkpoint = self.checkpoint();
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.persist(&checkpoint).await;
        });
    }

    /// Best effort: failures are logged and the session keeps going.
    pub(crate) async fn persist(&self, checkpoint: &Checkpoint) {
        let Some(store) = &self.checkpoints else {
            return;
        };
        match store.write(&self.id, checkpoint).await {
            Ok(()) => {
                tracing::debug!(
                    session_id = %self.id,
                    seq = checkpoint.seq,
                    store = store.name(),
                    "checkpoint written"
                );
                self.events.emit(EngineEvent::CheckpointWritten {
                    tasks: checkpoint.tasks.len(),
                });
            }
            Err(err) => {
                tracing::warn!(
                    session_id = %self.id,
                    seq = checkpoint.seq,
                    store = store.name(),
                    "checkpoint write failed: {err:#}"
                );
            }
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn resolve_under(root: Option<&Path>, path: &Path) -> PathBuf {
    match root {
        Some(root) if path.is_relative() => root.join(path),
        _ => path.to_path_buf(),
    }
}
