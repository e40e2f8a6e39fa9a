use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::engine::SessionEngine;
use super::traits::WorkExecutor;
use super::types::{TaskId, WorkerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Unresponsive,
    Terminated,
}

/// Worker record as seen by the scheduler and the health monitor.
#[derive(Debug, Clone)]
pub struct Worker {
    pub id: WorkerId,
    pub status: WorkerStatus,
    pub current_task: Option<TaskId>,
    pub last_heartbeat: Instant,
    pub tasks_completed: usize,
}

impl Worker {
    pub(crate) fn new(id: WorkerId) -> Self {
        Self {
            id,
            status: WorkerStatus::Idle,
            current_task: None,
            last_heartbeat: Instant::now(),
            tasks_completed: 0,
        }
    }
}

/// One dispatch of a task to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Assignment {
    pub task_id: TaskId,
    /// Session-unique dispatch token; doubles as the lock holder generation.
    pub dispatch: u64,
    pub attempt: u32,
}

struct Slot {
    worker: Worker,
    current: Option<Assignment>,
    jobs: mpsc::Sender<Assignment>,
    handle: JoinHandle<()>,
}

/// Owns the worker records and their tokio tasks.
///
/// Lives inside the engine state mutex; nothing here blocks or awaits.
pub(crate) struct WorkerPool {
    slots: BTreeMap<WorkerId, Slot>,
    retired: Vec<Worker>,
    next_id: WorkerId,
}

impl WorkerPool {
    pub(crate) fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
            retired: Vec::new(),
            next_id: 0,
        }
    }

    /// Spawn `size` workers.
    pub(crate) fn start<E: WorkExecutor>(&mut self, size: usize, engine: &Arc<SessionEngine<E>>) {
        for _ in 0..size {
            self.spawn(engine);
        }
    }

    pub(crate) fn spawn<E: WorkExecutor>(&mut self, engine: &Arc<SessionEngine<E>>) -> WorkerId {
        let id = self.next_id;
        self.next_id += 1;

        // One slot: a worker only ever holds the assignment it is running.
        let (jobs, rx) = mpsc::channel(1);
        let handle = tokio::spawn(worker_loop(Arc::clone(engine), id, rx));
        self.slots.insert(
            id,
            Slot {
                worker: Worker::new(id),
                current: None,
                jobs,
                handle,
            },
        );
        tracing::debug!(target: "parallax.pool", worker_id = id, "worker spawned");
        id
    }

    /// Lowest-numbered idle worker.
    pub(crate) fn idle_worker(&self) -> Option<WorkerId> {
        self.slots
            .values()
            .find(|s| s.worker.status == WorkerStatus::Idle)
            .map(|s| s.worker.id)
    }

    /// Hand an assignment to an idle worker. Gives the assignment back when
    /// the worker can no longer receive it.
    pub(crate) fn assign(
        &mut self,
        worker_id: WorkerId,
        assignment: Assignment,
    ) -> Result<(), Assignment> {
        let Some(slot) = self.slots.get_mut(&worker_id) else {
            return Err(assignment);
        };
        if let Err(err) = slot.jobs.try_send(assignment.clone()) {
            return Err(err.into_inner());
        }
        slot.worker.status = WorkerStatus::Busy;
        slot.worker.current_task = Some(assignment.task_id.clone());
        slot.worker.last_heartbeat = Instant::now();
        slot.current = Some(assignment);
        Ok(())
    }

    pub(crate) fn is_current(&self, worker_id: WorkerId, dispatch: u64) -> bool {
        self.slots
            .get(&worker_id)
            .and_then(|s| s.current.as_ref())
            .is_some_and(|a| a.dispatch == dispatch)
    }

    /// Return a worker to Idle once its current assignment reports back.
    /// False when the report belongs to a superseded dispatch.
    pub(crate) fn finish(&mut self, worker_id: WorkerId, dispatch: u64, completed: bool) -> bool {
        if !self.is_current(worker_id, dispatch) {
            return false;
        }
        let Some(slot) = self.slots.get_mut(&worker_id) else {
            return false;
        };
        slot.current = None;
        slot.worker.status = WorkerStatus::Idle;
        slot.worker.current_task = None;
        slot.worker.last_heartbeat = Instant::now();
        if completed {
            slot.worker.tasks_completed += 1;
        }
        true
    }

    pub(crate) fn heartbeat(&mut self, worker_id: WorkerId) {
        if let Some(slot) = self.slots.get_mut(&worker_id) {
            slot.worker.last_heartbeat = Instant::now();
        }
    }

    /// Abort the worker's task and move its record to the retired list.
    /// Returns the assignment it was holding.
    pub(crate) fn retire(&mut self, worker_id: WorkerId, status: WorkerStatus) -> Option<Assignment> {
        let mut slot = self.slots.remove(&worker_id)?;
        slot.handle.abort();
        slot.worker.status = status;
        slot.worker.current_task = None;
        self.retired.push(slot.worker);
        slot.current
    }

    /// Abort the worker's task without touching its record, as if the
    /// process backing it had died. The health monitor picks it up later.
    pub(crate) fn kill(&mut self, worker_id: WorkerId) -> bool {
        match self.slots.get(&worker_id) {
            Some(slot) => {
                slot.handle.abort();
                true
            }
            None => false,
        }
    }

    pub(crate) fn busy_workers(&self) -> Vec<WorkerId> {
        self.slots
            .values()
            .filter(|s| s.worker.status == WorkerStatus::Busy)
            .map(|s| s.worker.id)
            .collect()
    }

    pub(crate) fn live(&self) -> impl Iterator<Item = &Worker> {
        self.slots.values().map(|s| &s.worker)
    }

    pub(crate) fn live_count(&self) -> usize {
        self.slots.len()
    }

    /// Live workers first, then retired ones.
    pub(crate) fn workers(&self) -> Vec<Worker> {
        self.live().chain(self.retired.iter()).cloned().collect()
    }

    /// Stop every worker. Idle workers are parked on their job channel, so
    /// aborting them loses nothing.
    pub(crate) fn shutdown(&mut self) {
        let ids: Vec<WorkerId> = self.slots.keys().copied().collect();
        for id in ids {
            self.retire(id, WorkerStatus::Terminated);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for slot in self.slots.values() {
            slot.handle.abort();
        }
    }
}

/// Long-lived worker: receives one assignment at a time and heartbeats while
/// it is busy. Exits when the pool drops its job sender.
async fn worker_loop<E: WorkExecutor>(
    engine: Arc<SessionEngine<E>>,
    worker_id: WorkerId,
    mut jobs: mpsc::Receiver<Assignment>,
) {
    while let Some(assignment) = jobs.recv().await {
        let report = {
            let work = engine.execute(worker_id, &assignment);
            tokio::pin!(work);

            let mut heartbeat = tokio::time::interval(engine.config().heartbeat_interval());
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    report = &mut work => break report,
                    _ = heartbeat.tick() => engine.heartbeat(worker_id),
                }
            }
        };
        engine.complete_assignment(worker_id, assignment, report);
    }
    tracing::debug!(target: "parallax.pool", worker_id, "worker exiting");
}
