#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use parallax_core::executor::{LockMode, WorkContext, WorkOutput};
use parallax_core::{
    EngineConfig, EngineEvent, EventEnvelope, ExecutionError, TaskSpec, WorkExecutor,
};
use tokio::sync::broadcast;

/// What a scripted task does when it runs.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub sleep: Duration,
    /// Fail every attempt numbered below this.
    pub fail_attempts: u32,
    /// First attempt sleeps until cancelled.
    pub hang_first: bool,
    /// Sleep through cancellation.
    pub ignore_cancel: bool,
    /// Report cancellation as an ordinary failure.
    pub fail_on_cancel: bool,
    /// First attempt panics.
    pub panic_first: bool,
}

impl Script {
    pub fn sleep_ms(ms: u64) -> Self {
        Self {
            sleep: Duration::from_millis(ms),
            ..Self::default()
        }
    }

    pub fn failing(attempts: u32) -> Self {
        Self {
            fail_attempts: attempts,
            ..Self::default()
        }
    }
}

/// Observations shared between a test and its executor.
#[derive(Default)]
pub struct Stats {
    running: AtomicUsize,
    pub max_running: AtomicUsize,
    /// Overlapping exclusive access to the same file.
    pub conflicts: AtomicUsize,
    writers: Mutex<HashMap<PathBuf, usize>>,
    pub attempts: Mutex<Vec<(String, u32)>>,
}

impl Stats {
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn conflicts(&self) -> usize {
        self.conflicts.load(Ordering::SeqCst)
    }

    pub fn attempts_of(&self, task_id: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == task_id)
            .count()
    }

    fn enter(&self, task: &TaskSpec<Script>, attempt: u32) {
        self.attempts
            .lock()
            .unwrap()
            .push((task.id.clone(), attempt));
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let mut writers = self.writers.lock().unwrap();
        for decl in task
            .declared_files
            .iter()
            .filter(|d| d.mode == LockMode::Exclusive)
        {
            let count = writers.entry(decl.path.clone()).or_insert(0);
            *count += 1;
            if *count > 1 {
                self.conflicts.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn leave(&self, task: &TaskSpec<Script>) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        let mut writers = self.writers.lock().unwrap();
        for decl in task
            .declared_files
            .iter()
            .filter(|d| d.mode == LockMode::Exclusive)
        {
            if let Some(count) = writers.get_mut(&decl.path) {
                *count = count.saturating_sub(1);
            }
        }
    }
}

pub struct ScriptedExecutor {
    pub stats: Arc<Stats>,
}

impl ScriptedExecutor {
    pub fn new() -> (Self, Arc<Stats>) {
        let stats = Arc::new(Stats::default());
        (
            Self {
                stats: Arc::clone(&stats),
            },
            stats,
        )
    }
}

#[async_trait]
impl WorkExecutor for ScriptedExecutor {
    type Payload = Script;

    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(
        &self,
        task: &TaskSpec<Script>,
        ctx: WorkContext,
    ) -> Result<WorkOutput, ExecutionError> {
        let script = &task.payload;
        self.stats.enter(task, ctx.attempt);

        if script.panic_first && ctx.attempt == 0 {
            self.stats.leave(task);
            panic!("scripted panic in {}", task.id);
        }

        let sleep = if script.hang_first && ctx.attempt == 0 {
            Duration::from_secs(60)
        } else {
            script.sleep
        };

        let result = if script.ignore_cancel {
            tokio::time::sleep(sleep).await;
            Ok(())
        } else {
            tokio::select! {
                _ = tokio::time::sleep(sleep) => Ok(()),
                _ = ctx.cancel.cancelled() => Err(if script.fail_on_cancel {
                    ExecutionError::Failed(format!("{} interrupted", task.id))
                } else {
                    ExecutionError::Cancelled
                }),
            }
        };
        self.stats.leave(task);
        result?;

        if ctx.attempt < script.fail_attempts {
            return Err(ExecutionError::Failed(format!(
                "{} failed on attempt {}",
                task.id, ctx.attempt
            )));
        }
        Ok(WorkOutput::text(format!("{} done", task.id)))
    }
}

pub fn task(id: &str, script: Script) -> TaskSpec<Script> {
    TaskSpec::new(id, script)
}

pub fn edge(from: &str, to: &str) -> (String, String) {
    (from.to_string(), to.to_string())
}

/// Route engine logs through the test harness. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Short timings so recovery paths finish quickly.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        concurrency: 2,
        max_retries: 2,
        heartbeat_interval_ms: 20,
        heartbeat_timeout_ms: 200,
        lock_timeout_ms: 5_000,
        checkpoint_interval_ms: 0,
        cancel_grace_ms: 200,
        respawn_workers: true,
        event_capacity: 4096,
    }
}

/// Everything already published for `session_id`.
pub fn drain(rx: &mut broadcast::Receiver<EventEnvelope>, session_id: &str) -> Vec<EventEnvelope> {
    let mut out = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        if envelope.session_id == session_id {
            out.push(envelope);
        }
    }
    out
}

/// Wait for the first event matching `pred`.
pub async fn wait_for(
    rx: &mut broadcast::Receiver<EventEnvelope>,
    pred: impl Fn(&EngineEvent) -> bool,
) -> EventEnvelope {
    let wait = async {
        loop {
            let envelope = rx.recv().await.expect("event bus closed");
            if pred(&envelope.event) {
                return envelope;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for event")
}

pub fn position(events: &[EventEnvelope], pred: impl Fn(&EngineEvent) -> bool) -> Option<usize> {
    events.iter().position(|e| pred(&e.event))
}

pub fn count(events: &[EventEnvelope], pred: impl Fn(&EngineEvent) -> bool) -> usize {
    events.iter().filter(|e| pred(&e.event)).count()
}

pub fn completed(id: &str) -> impl Fn(&EngineEvent) -> bool + '_ {
    move |e| matches!(e, EngineEvent::TaskCompleted { task_id, .. } if task_id == id)
}

pub fn assigned(id: &str) -> impl Fn(&EngineEvent) -> bool + '_ {
    move |e| matches!(e, EngineEvent::TaskAssigned { task_id, .. } if task_id == id)
}

pub fn ready(id: &str) -> impl Fn(&EngineEvent) -> bool + '_ {
    move |e| matches!(e, EngineEvent::TaskReady { task_id } if task_id == id)
}
