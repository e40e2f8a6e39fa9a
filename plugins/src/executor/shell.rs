use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use parallax_core::{ExecutionError, TaskSpec, WorkContext, WorkExecutor, WorkOutput};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::tail::{pump, OutputTail};

pub const DEFAULT_TAIL_BYTES: usize = 8 * 1024;

/// A shell script to run for one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellCommand {
    pub script: String,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Working directory. Relative paths resolve against the task root when
    /// a provisioner is configured.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl ShellCommand {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            ..Self::default()
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// Runs each task's script through the platform shell.
///
/// Every child sees `PARALLAX_SESSION_ID`, `PARALLAX_TASK_ID`,
/// `PARALLAX_ATTEMPT` and `PARALLAX_WORKER_ID`. Cancellation kills the child.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    tail_bytes: usize,
    default_cwd: Option<PathBuf>,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self {
            tail_bytes: DEFAULT_TAIL_BYTES,
            default_cwd: None,
        }
    }

    /// Bytes of stdout/stderr kept for the task outcome.
    pub fn with_tail_bytes(mut self, bytes: usize) -> Self {
        self.tail_bytes = bytes;
        self
    }

    /// Directory used when neither the command nor a task root sets one.
    pub fn with_default_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.default_cwd = Some(cwd.into());
        self
    }

    fn command(&self, task: &TaskSpec<ShellCommand>, ctx: &WorkContext) -> Command {
        let payload = &task.payload;
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&payload.script);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&payload.script);
            c
        };

        let cwd = match &payload.cwd {
            Some(dir) => Some(ctx.resolve(dir)),
            None => ctx.root.clone().or_else(|| self.default_cwd.clone()),
        };
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        cmd.env("PARALLAX_SESSION_ID", &ctx.session_id)
            .env("PARALLAX_TASK_ID", &task.id)
            .env("PARALLAX_ATTEMPT", ctx.attempt.to_string())
            .env("PARALLAX_WORKER_ID", ctx.worker_id.to_string())
            .envs(&payload.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkExecutor for ShellExecutor {
    type Payload = ShellCommand;

    fn name(&self) -> &str {
        "shell"
    }

    async fn run(
        &self,
        task: &TaskSpec<ShellCommand>,
        ctx: WorkContext,
    ) -> Result<WorkOutput, ExecutionError> {
        let mut child = self.command(task, &ctx).spawn().map_err(|e| {
            ExecutionError::Io(format!("failed to spawn shell for task {}: {e}", task.id))
        })?;
        tracing::debug!(
            task_id = %task.id,
            attempt = ctx.attempt,
            pid = child.id(),
            "shell task started"
        );

        let out_tail = OutputTail::new(self.tail_bytes);
        let err_tail = OutputTail::new(self.tail_bytes);
        let out_pump = child.stdout.take().map(|rd| pump(rd, Arc::clone(&out_tail)));
        let err_pump = child.stderr.take().map(|rd| pump(rd, Arc::clone(&err_tail)));

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = ctx.cancel.cancelled() => {
                if let Err(err) = child.kill().await {
                    tracing::warn!(task_id = %task.id, "failed to kill cancelled task: {err}");
                }
                return Err(ExecutionError::Cancelled);
            }
        };

        let pumps = [out_pump, err_pump].into_iter().flatten();
        for joined in futures::future::join_all(pumps).await {
            match joined {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => tracing::warn!(task_id = %task.id, "output stream error: {err}"),
                Err(err) => tracing::warn!(task_id = %task.id, "output pump failed: {err}"),
            }
        }

        if status.success() {
            return Ok(WorkOutput::text(out_tail.text()));
        }

        let code = status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let stderr = err_tail.text();
        Err(ExecutionError::Failed(if stderr.is_empty() {
            format!("exit status {code}")
        } else {
            format!("exit status {code}: {stderr}")
        }))
    }
}
