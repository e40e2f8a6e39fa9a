use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ExecutionError;
use crate::executor::types::{TaskSpec, WorkerId};

/// Host capability that performs the actual effect of a task.
///
/// Implementations must watch `ctx.cancel` and return promptly once it fires;
/// executors that ignore it are force-terminated after the session's grace
/// period.
#[async_trait]
pub trait WorkExecutor: Send + Sync + 'static {
    /// Host-defined task payload. The engine never inspects it.
    type Payload: Send + Sync + 'static;

    fn name(&self) -> &str {
        "executor"
    }

    async fn run(
        &self,
        task: &TaskSpec<Self::Payload>,
        ctx: WorkContext,
    ) -> Result<WorkOutput, ExecutionError>;
}

/// Per-attempt context handed to the executor.
#[derive(Debug, Clone)]
pub struct WorkContext {
    pub session_id: String,
    pub worker_id: WorkerId,
    /// Zero on the first attempt.
    pub attempt: u32,
    /// Isolated root from the worktree provisioner, if one is configured.
    pub root: Option<PathBuf>,
    pub cancel: CancellationToken,
}

impl WorkContext {
    /// Resolve a declared path against the provisioned root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkOutput {
    pub text: String,
}

impl WorkOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}
