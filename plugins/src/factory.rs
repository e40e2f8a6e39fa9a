use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use parallax_core::config::{get_parallax_data_dir, CheckpointConfig, ProvisionerConfig};
use parallax_core::executor::{CheckpointStore, WorktreeProvisioner};

use crate::checkpoint::FileCheckpointStore;
use crate::provisioner::DirectoryProvisioner;

pub fn build_checkpoint_store(cfg: &CheckpointConfig) -> Result<Option<Arc<dyn CheckpointStore>>> {
    if !cfg.enabled {
        return Ok(None);
    }
    let dir = resolve_dir(cfg.directory.as_deref(), "checkpoints")?;
    tracing::debug!(directory = %dir.display(), max_snapshots = cfg.max_snapshots, "file checkpoint store");
    Ok(Some(Arc::new(FileCheckpointStore::new(dir, cfg.max_snapshots))))
}

pub fn build_provisioner(cfg: &ProvisionerConfig) -> Result<Option<Arc<dyn WorktreeProvisioner>>> {
    if !cfg.enabled {
        return Ok(None);
    }
    let base = resolve_dir(cfg.base_dir.as_deref(), "worktrees")?;
    Ok(Some(Arc::new(DirectoryProvisioner::new(base))))
}

fn resolve_dir(configured: Option<&str>, fallback: &str) -> Result<PathBuf> {
    match configured.map(str::trim).filter(|s| !s.is_empty()) {
        Some(dir) => Ok(PathBuf::from(shellexpand::tilde(dir).into_owned())),
        None => Ok(get_parallax_data_dir()?.join(fallback)),
    }
}
