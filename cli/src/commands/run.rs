use std::path::Path;

use parallax_core::config::AppConfig;
use parallax_core::error::CliError;
use parallax_core::events_out::start_events_out;
use parallax_core::{Checkpoint, EngineEvent, EventEnvelope, SessionError, SessionManager, SessionReport};
use parallax_plugins::{factory, FileCheckpointStore, ShellExecutor};
use tokio::sync::broadcast;

use crate::commands::cli::RunArgs;
use crate::plan::LoadedPlan;
use crate::render::render_report;

const INTERRUPT_REASON: &str = "interrupted";

pub async fn handle_run(args: RunArgs, mut cfg: AppConfig) -> Result<i32, CliError> {
    if let Some(n) = args.concurrency {
        cfg.engine.concurrency = n;
    }
    if let Some(n) = args.max_retries {
        cfg.engine.max_retries = n;
    }
    if let Some(path) = &args.events_out {
        cfg.events_out.enabled = true;
        cfg.events_out.path = path.clone();
    }
    cfg.engine
        .validate()
        .map_err(|e| CliError::Config(e.to_string()))?;

    let loaded = LoadedPlan::load(&args.plan)?;
    let executor = ShellExecutor::new().with_default_cwd(&loaded.base_dir);

    let mut builder = SessionManager::builder(cfg.engine.clone(), executor);
    if let Some(store) = factory::build_checkpoint_store(&cfg.checkpoint)
        .map_err(|e| CliError::Config(format!("{e:#}")))?
    {
        builder = builder.checkpoint_store(store);
    }
    if let Some(provisioner) = factory::build_provisioner(&cfg.provisioner)
        .map_err(|e| CliError::Config(format!("{e:#}")))?
    {
        builder = builder.provisioner(provisioner);
    }
    let manager = builder
        .build()
        .map_err(|e| CliError::Config(e.to_string()))?;

    let events_out = start_events_out(&cfg.events_out, manager.events())
        .await
        .map_err(|e| CliError::Config(format!("{e:#}")))?;
    let log_task = tokio::spawn(log_events(manager.subscribe()));

    let id = manager.create_session(loaded.tasks(), loaded.edges(), cfg.engine.concurrency)?;
    if let Some(from) = &args.resume_from {
        let checkpoint = load_resume_checkpoint(from).await?;
        let applied = manager.reconcile_from_checkpoint(&id, &checkpoint)?;
        tracing::info!(
            session_id = %id,
            from_session = %checkpoint.session_id,
            applied,
            "resuming from checkpoint"
        );
    }

    let result = run_until_interrupted(&manager, &id).await;

    log_task.abort();
    if let Some(out) = events_out {
        let dropped = out.close().await;
        if dropped > 0 {
            tracing::warn!(dropped, "events output dropped lines");
        }
    }

    let report = match result {
        Ok(report) => report,
        Err(SessionError::NoLiveWorkers(_)) => manager.report(&id)?,
        Err(err) => return Err(err.into()),
    };

    if args.json {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| CliError::Command(format!("failed to encode report: {e}")))?;
        println!("{json}");
    } else {
        print!("{}", render_report(&report));
    }
    Ok(if report.all_completed() { 0 } else { 1 })
}

/// Drive the session; the first Ctrl-C aborts it and the run winds down.
async fn run_until_interrupted(
    manager: &SessionManager<ShellExecutor>,
    id: &str,
) -> Result<SessionReport, SessionError> {
    let run = manager.run(id);
    tokio::pin!(run);
    let mut interrupted = false;

    loop {
        tokio::select! {
            result = &mut run => return result,
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                if let Err(err) = signal {
                    tracing::warn!("failed to listen for Ctrl-C: {err}");
                    continue;
                }
                eprintln!("interrupted, aborting session {id}");
                if let Err(err) = manager.abort(id, INTERRUPT_REASON) {
                    tracing::warn!(session_id = %id, "abort failed: {err}");
                }
            }
        }
    }
}

/// A checkpoint file, or the newest checkpoint in a directory.
async fn load_resume_checkpoint(path: &Path) -> Result<Checkpoint, CliError> {
    if !path.is_dir() {
        return Ok(Checkpoint::load_from_file(path)?);
    }
    let store = FileCheckpointStore::new(path, 1);
    store.load_most_recent().await?.ok_or_else(|| {
        CliError::Command(format!("no checkpoints found in {}", path.display()))
    })
}

async fn log_events(mut rx: broadcast::Receiver<EventEnvelope>) {
    loop {
        let envelope = match rx.recv().await {
            Ok(envelope) => envelope,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::debug!(missed, "event log fell behind");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        log_event(&envelope);
    }
}

fn log_event(envelope: &EventEnvelope) {
    let session_id = envelope.session_id.as_str();
    match &envelope.event {
        EngineEvent::TaskAssigned { task_id, worker_id } => {
            tracing::info!(session_id, task_id = %task_id, worker_id, "task started");
        }
        EngineEvent::TaskCompleted {
            task_id,
            duration_ms,
        } => {
            tracing::info!(session_id, task_id = %task_id, duration_ms, "task finished");
        }
        EngineEvent::TaskRetrying {
            task_id,
            error,
            retry_count,
        } => {
            tracing::warn!(session_id, task_id = %task_id, retry_count, "retrying: {error}");
        }
        EngineEvent::TaskFailed { task_id, error, .. } => {
            tracing::error!(session_id, task_id = %task_id, "failed: {error}");
        }
        EngineEvent::TaskBlocked {
            task_id,
            blocked_by_failure_of,
        } => {
            tracing::warn!(session_id, task_id = %task_id, blocked_by = %blocked_by_failure_of, "blocked");
        }
        EngineEvent::LockTimeout {
            path,
            task_id,
            waited_ms,
        } => {
            tracing::warn!(
                session_id,
                task_id = %task_id,
                path = %path.display(),
                waited_ms,
                "lock wait timed out"
            );
        }
        EngineEvent::WorkerUnresponsive {
            worker_id,
            last_task_id,
        } => {
            tracing::warn!(session_id, worker_id, task_id = ?last_task_id, "worker unresponsive");
        }
        other => {
            tracing::debug!(session_id, seq = envelope.seq, event = ?other, "event");
        }
    }
}
