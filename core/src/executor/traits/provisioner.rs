use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Supplies an isolated filesystem root per task. Optional: without one,
/// declared files are locked as given.
#[async_trait]
pub trait WorktreeProvisioner: Send + Sync {
    fn name(&self) -> &str;

    async fn provision(&self, session_id: &str, task_id: &str) -> anyhow::Result<PathBuf>;

    async fn release(&self, _session_id: &str, _task_id: &str, _root: &Path) -> anyhow::Result<()> {
        Ok(())
    }
}
