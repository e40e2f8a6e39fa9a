use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parallax_core::executor::WorktreeProvisioner;

/// Gives every task a plain directory at `<base>/<session>/<task>`.
#[derive(Debug, Clone)]
pub struct DirectoryProvisioner {
    base: PathBuf,
    remove_on_release: bool,
}

impl DirectoryProvisioner {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            remove_on_release: false,
        }
    }

    /// Delete the task directory once the attempt is over.
    pub fn remove_on_release(mut self, remove: bool) -> Self {
        self.remove_on_release = remove;
        self
    }

    pub fn root_for(&self, session_id: &str, task_id: &str) -> PathBuf {
        self.base
            .join(path_component(session_id))
            .join(path_component(task_id))
    }
}

#[async_trait]
impl WorktreeProvisioner for DirectoryProvisioner {
    fn name(&self) -> &str {
        "directory"
    }

    async fn provision(&self, session_id: &str, task_id: &str) -> Result<PathBuf> {
        let root = self.root_for(session_id, task_id);
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create task root {}", root.display()))?;
        Ok(root)
    }

    async fn release(&self, _session_id: &str, _task_id: &str, root: &Path) -> Result<()> {
        if !self.remove_on_release {
            return Ok(());
        }
        match tokio::fs::remove_dir_all(root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", root.display())),
        }
    }
}

/// Task ids are free-form; keep them to a single safe path component.
fn path_component(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => format!("_{}", cleaned.len()),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn ids_become_single_components() {
        assert_eq!(path_component("build/linux x64"), "build_linux_x64");
        assert_eq!(path_component(".."), "_2");
        assert_eq!(path_component("ok-1.2_x"), "ok-1.2_x");
    }

    #[tokio::test]
    async fn provisions_and_releases() {
        let base = TempDir::new().unwrap();
        let provisioner = DirectoryProvisioner::new(base.path()).remove_on_release(true);

        let root = provisioner.provision("s1", "compile").await.unwrap();
        assert_eq!(root, base.path().join("s1").join("compile"));
        assert!(root.is_dir());

        provisioner.release("s1", "compile", &root).await.unwrap();
        assert!(!root.exists());
        // Releasing twice is fine.
        provisioner.release("s1", "compile", &root).await.unwrap();
    }

    #[tokio::test]
    async fn keeps_roots_by_default() {
        let base = TempDir::new().unwrap();
        let provisioner = DirectoryProvisioner::new(base.path());
        let root = provisioner.provision("s1", "t").await.unwrap();
        provisioner.release("s1", "t", &root).await.unwrap();
        assert!(root.is_dir());
    }
}
