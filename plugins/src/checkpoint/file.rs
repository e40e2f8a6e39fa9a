use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parallax_core::executor::CheckpointStore;
use parallax_core::Checkpoint;

const PREFIX: &str = "checkpoint_";
const SUFFIX: &str = ".json";

/// One JSON file per checkpoint: `checkpoint_<session>_<seq>.json`.
/// Only the newest `max_snapshots` files per session are kept.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    max_snapshots: usize,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>, max_snapshots: usize) -> Self {
        Self {
            dir: dir.into(),
            max_snapshots: max_snapshots.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, session_id: &str, seq: u64) -> PathBuf {
        self.dir.join(format!("{PREFIX}{session_id}_{seq}{SUFFIX}"))
    }

    /// Checkpoint files of one session, oldest first.
    pub async fn list(&self, session_id: &str) -> Result<Vec<(u64, PathBuf)>> {
        let mut found: Vec<(u64, PathBuf)> = self
            .scan()
            .await?
            .into_iter()
            .filter(|(session, _, _)| session == session_id)
            .map(|(_, seq, path)| (seq, path))
            .collect();
        found.sort_by_key(|(seq, _)| *seq);
        Ok(found)
    }

    /// Session ids with at least one checkpoint, sorted.
    pub async fn sessions(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.scan().await?.into_iter().map(|(s, _, _)| s).collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    pub async fn load_latest(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        match self.list(session_id).await?.pop() {
            Some((_, path)) => Ok(Some(read(&path).await?)),
            None => Ok(None),
        }
    }

    /// Newest checkpoint across every session in the directory.
    pub async fn load_most_recent(&self) -> Result<Option<Checkpoint>> {
        let mut newest: Option<Checkpoint> = None;
        for session in self.sessions().await? {
            if let Some(cp) = self.load_latest(&session).await? {
                if newest.as_ref().map_or(true, |n| cp.taken_at > n.taken_at) {
                    newest = Some(cp);
                }
            }
        }
        Ok(newest)
    }

    async fn scan(&self) -> Result<Vec<(String, u64, PathBuf)>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.dir.display()))
            }
        };

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some((session, seq)) = name.to_str().and_then(parse_file_name) {
                found.push((session.to_string(), seq, entry.path()));
            }
        }
        Ok(found)
    }

    async fn prune(&self, session_id: &str) -> Result<()> {
        let files = self.list(session_id).await?;
        let excess = files.len().saturating_sub(self.max_snapshots);
        for (seq, path) in files.into_iter().take(excess) {
            if let Err(err) = tokio::fs::remove_file(&path).await {
                tracing::warn!(session_id, seq, "failed to prune {}: {err}", path.display());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn write(&self, session_id: &str, checkpoint: &Checkpoint) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.path_for(session_id, checkpoint.seq);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, checkpoint.to_json()?)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move checkpoint into {}", path.display()))?;

        self.prune(session_id).await
    }
}

async fn read(path: &Path) -> Result<Checkpoint> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
    Checkpoint::from_json(&json)
        .with_context(|| format!("Failed to parse checkpoint {}", path.display()))
}

fn parse_file_name(name: &str) -> Option<(&str, u64)> {
    let stem = name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
    let (session, seq) = stem.rsplit_once('_')?;
    if session.is_empty() {
        return None;
    }
    Some((session, seq.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parallax_core::executor::TaskStatus;
    use parallax_core::state::TaskCheckpoint;
    use parallax_core::SessionStatus;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn checkpoint(session: &str, seq: u64, done: &[&str]) -> Checkpoint {
        let tasks = done
            .iter()
            .map(|id| TaskCheckpoint {
                id: id.to_string(),
                status: TaskStatus::Completed,
                retry_count: 0,
            })
            .collect();
        Checkpoint::new(session.to_string(), seq, SessionStatus::Running, tasks, Vec::new())
    }

    #[test]
    fn file_names_round_trip() {
        assert_eq!(parse_file_name("checkpoint_abc-1_12.json"), Some(("abc-1", 12)));
        assert_eq!(parse_file_name("checkpoint_a_b_3.json"), Some(("a_b", 3)));
        assert_eq!(parse_file_name("checkpoint__3.json"), None);
        assert_eq!(parse_file_name("checkpoint_abc_x.json"), None);
        assert_eq!(parse_file_name("notes.json"), None);
    }

    #[tokio::test]
    async fn keeps_newest_snapshots_only() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path(), 2);
        for seq in 1..=4 {
            store.write("s1", &checkpoint("s1", seq, &["a"])).await.unwrap();
        }
        store.write("s2", &checkpoint("s2", 1, &[])).await.unwrap();

        let seqs: Vec<u64> = store.list("s1").await.unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(seqs, vec![3, 4]);
        assert_eq!(store.sessions().await.unwrap(), vec!["s1".to_string(), "s2".to_string()]);

        let latest = store.load_latest("s1").await.unwrap().unwrap();
        assert_eq!(latest.seq, 4);
        assert_eq!(latest.completed_tasks(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("nope"), 5);
        assert!(store.load_latest("s1").await.unwrap().is_none());
        assert!(store.load_most_recent().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn most_recent_spans_sessions() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path(), 5);
        store.write("old", &checkpoint("old", 7, &[])).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.write("new", &checkpoint("new", 1, &["x"])).await.unwrap();

        let newest = store.load_most_recent().await.unwrap().unwrap();
        assert_eq!(newest.session_id, "new");
    }
}
