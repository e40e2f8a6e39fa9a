use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::LockError;
use crate::events::{EngineEvent, EventSink};
use crate::executor::types::{FileDecl, LockMode, TaskId};

/// Identity of one lock holder: a task plus the dispatch it belongs to.
///
/// A task redistributed after a worker death gets a fresh `dispatch`, so the
/// stale attempt can be fenced without affecting the new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockHolder {
    pub task_id: TaskId,
    pub dispatch: u64,
}

impl LockHolder {
    pub fn new(task_id: impl Into<TaskId>, dispatch: u64) -> Self {
        Self {
            task_id: task_id.into(),
            dispatch,
        }
    }
}

/// Paths granted by one successful `acquire`.
#[derive(Debug)]
#[must_use = "locks stay held until passed to FileLockManager::release"]
pub struct LockSet {
    holder: LockHolder,
    paths: Vec<(PathBuf, LockMode)>,
}

impl LockSet {
    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(|(p, _)| p.as_path())
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Lock table row as written to checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub path: PathBuf,
    pub mode: LockMode,
    pub holders: Vec<TaskId>,
    pub waiting: Vec<TaskId>,
    pub held_ms: u64,
}

struct Waiter {
    holder: LockHolder,
    mode: LockMode,
    tx: oneshot::Sender<()>,
}

#[derive(Default)]
struct LockEntry {
    holders: Vec<(LockHolder, LockMode)>,
    acquired_at: Option<Instant>,
    queue: VecDeque<Waiter>,
}

impl LockEntry {
    fn compatible(&self, mode: LockMode) -> bool {
        self.holders.is_empty()
            || (mode == LockMode::Shared && self.holders.iter().all(|(_, m)| *m == LockMode::Shared))
    }

    /// Queued acquirers never get overtaken by newcomers.
    fn grantable(&self, mode: LockMode) -> bool {
        self.queue.is_empty() && self.compatible(mode)
    }

    fn grant(&mut self, holder: LockHolder, mode: LockMode) {
        self.holders.push((holder, mode));
        self.acquired_at = Some(Instant::now());
    }

    fn holds(&self, holder: &LockHolder) -> bool {
        self.holders.iter().any(|(h, _)| h == holder)
    }

    /// Hand the lock to queued waiters in FIFO order. Consecutive shared
    /// waiters at the head are granted together.
    fn promote(&mut self) -> Vec<LockHolder> {
        let mut granted = Vec::new();
        while let Some(front) = self.queue.front() {
            if !self.compatible(front.mode) {
                break;
            }
            let Some(waiter) = self.queue.pop_front() else {
                break;
            };
            self.grant(waiter.holder.clone(), waiter.mode);
            if waiter.tx.send(()).is_err() {
                // Waiter went away between queueing and now.
                self.holders.retain(|(h, _)| h != &waiter.holder);
                continue;
            }
            granted.push(waiter.holder);
        }
        granted
    }

    fn is_idle(&self) -> bool {
        self.holders.is_empty() && self.queue.is_empty()
    }

    fn mode(&self) -> LockMode {
        if self.holders.iter().any(|(_, m)| *m == LockMode::Exclusive) {
            LockMode::Exclusive
        } else {
            LockMode::Shared
        }
    }
}

#[derive(Default)]
struct LockTable {
    entries: BTreeMap<PathBuf, LockEntry>,
    /// Highest revoked dispatch per task. Dispatch numbers only grow within
    /// a session, so everything at or below the mark is stale.
    revoked: HashMap<TaskId, u64>,
}

impl LockTable {
    fn is_fenced(&self, holder: &LockHolder) -> bool {
        self.revoked
            .get(&holder.task_id)
            .is_some_and(|&mark| holder.dispatch <= mark)
    }

    fn fence(&mut self, holder: &LockHolder) {
        let mark = self.revoked.entry(holder.task_id.clone()).or_insert(0);
        *mark = (*mark).max(holder.dispatch);
    }
}

/// Per-path lock table. The single source of truth for write-conflict
/// prevention inside a session.
pub struct FileLockManager {
    table: Mutex<LockTable>,
    contention: AtomicU64,
    events: Option<EventSink>,
}

impl FileLockManager {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            contention: AtomicU64::new(0),
            events: None,
        }
    }

    pub fn with_events(events: EventSink) -> Self {
        Self {
            events: Some(events),
            ..Self::new()
        }
    }

    /// Acquire every declared path or none of them.
    ///
    /// Paths are normalized and taken in sorted order, which rules out
    /// circular waits between multi-file tasks. `timeout` bounds the wait on
    /// each individual path; on expiry everything taken by this call is
    /// released again.
    pub async fn acquire(
        &self,
        files: &[FileDecl],
        holder: LockHolder,
        timeout: Duration,
    ) -> Result<LockSet, LockError> {
        let requests = canonical_requests(files);
        let mut acquired: Vec<(PathBuf, LockMode)> = Vec::with_capacity(requests.len());

        for (path, mode) in requests {
            if let Err(err) = self.acquire_one(&path, mode, &holder, timeout).await {
                self.release_paths(&holder, acquired.iter().map(|(p, _)| p.as_path()));
                return Err(err);
            }
            acquired.push((path, mode));
        }

        Ok(LockSet {
            holder,
            paths: acquired,
        })
    }

    async fn acquire_one(
        &self,
        path: &Path,
        mode: LockMode,
        holder: &LockHolder,
        timeout: Duration,
    ) -> Result<(), LockError> {
        let rx = {
            let mut table = self.table();
            if table.is_fenced(holder) {
                return Err(LockError::Revoked(holder.task_id.clone()));
            }
            let entry = table.entries.entry(path.to_path_buf()).or_default();
            if entry.grantable(mode) {
                entry.grant(holder.clone(), mode);
                self.emit(EngineEvent::LockAcquired {
                    path: path.to_path_buf(),
                    task_id: holder.task_id.clone(),
                });
                return Ok(());
            }

            let (tx, rx) = oneshot::channel();
            entry.queue.push_back(Waiter {
                holder: holder.clone(),
                mode,
                tx,
            });
            self.contention.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                path = %path.display(),
                task_id = %holder.task_id,
                queued = entry.queue.len(),
                "waiting for file lock"
            );
            self.emit(EngineEvent::LockWaiting {
                path: path.to_path_buf(),
                task_id: holder.task_id.clone(),
            });
            rx
        };

        let started = Instant::now();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => {
                self.emit(EngineEvent::LockAcquired {
                    path: path.to_path_buf(),
                    task_id: holder.task_id.clone(),
                });
                Ok(())
            }
            // Sender dropped without a grant: the holder was revoked.
            Ok(Err(_)) => Err(LockError::Revoked(holder.task_id.clone())),
            Err(_) => {
                let mut table = self.table();
                let Some(entry) = table.entries.get_mut(path) else {
                    return Err(LockError::Revoked(holder.task_id.clone()));
                };
                // Granted right as the timer fired.
                if entry.holds(holder) {
                    drop(table);
                    self.emit(EngineEvent::LockAcquired {
                        path: path.to_path_buf(),
                        task_id: holder.task_id.clone(),
                    });
                    return Ok(());
                }
                entry.queue.retain(|w| &w.holder != holder);
                entry.promote();
                if entry.is_idle() {
                    table.entries.remove(path);
                }
                drop(table);

                let waited = started.elapsed();
                tracing::info!(
                    path = %path.display(),
                    task_id = %holder.task_id,
                    waited_ms = waited.as_millis() as u64,
                    "file lock timed out"
                );
                self.emit(EngineEvent::LockTimeout {
                    path: path.to_path_buf(),
                    task_id: holder.task_id.clone(),
                    waited_ms: waited.as_millis() as u64,
                });
                Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited,
                })
            }
        }
    }

    /// Release every path in the set, waking the longest waiter per path.
    pub fn release(&self, set: LockSet) {
        self.release_paths(&set.holder, set.paths.iter().map(|(p, _)| p.as_path()));
    }

    fn release_paths<'a>(&self, holder: &LockHolder, paths: impl Iterator<Item = &'a Path>) {
        let mut table = self.table();
        for path in paths {
            let Some(entry) = table.entries.get_mut(path) else {
                continue;
            };
            entry.holders.retain(|(h, _)| h != holder);
            let handed_to = entry.promote();
            if !handed_to.is_empty() {
                tracing::debug!(
                    path = %path.display(),
                    from = %holder.task_id,
                    to = ?handed_to.iter().map(|h| h.task_id.as_str()).collect::<Vec<_>>(),
                    "file lock handed over"
                );
            }
            if entry.is_idle() {
                table.entries.remove(path);
            }
        }
    }

    /// Force-release everything `holder` owns or waits for and fence it, and
    /// every earlier dispatch of the same task, from future acquisitions.
    /// Returns the paths it was holding.
    pub fn revoke(&self, holder: &LockHolder) -> Vec<PathBuf> {
        let mut table = self.table();
        table.fence(holder);

        let mut released = Vec::new();
        let mut idle = Vec::new();
        for (path, entry) in table.entries.iter_mut() {
            if entry.holds(holder) {
                entry.holders.retain(|(h, _)| h != holder);
                released.push(path.clone());
            }
            // Dropping the sender wakes the waiter with a revocation.
            entry.queue.retain(|w| &w.holder != holder);
            entry.promote();
            if entry.is_idle() {
                idle.push(path.clone());
            }
        }
        for path in idle {
            table.entries.remove(&path);
        }
        released
    }

    /// Current lock table, sorted by path.
    pub fn snapshot(&self) -> Vec<LockRecord> {
        let table = self.table();
        table
            .entries
            .iter()
            .filter(|(_, e)| !e.holders.is_empty())
            .map(|(path, entry)| LockRecord {
                path: path.clone(),
                mode: entry.mode(),
                holders: entry.holders.iter().map(|(h, _)| h.task_id.clone()).collect(),
                waiting: entry.queue.iter().map(|w| w.holder.task_id.clone()).collect(),
                held_ms: entry
                    .acquired_at
                    .map(|t| t.elapsed().as_millis() as u64)
                    .unwrap_or(0),
            })
            .collect()
    }

    /// Number of acquisitions that had to queue.
    pub fn contention_events(&self) -> u64 {
        self.contention.load(Ordering::Relaxed)
    }

    pub fn is_locked(&self, path: &Path) -> bool {
        self.table()
            .entries
            .get(&normalize_path(path))
            .map(|e| !e.holders.is_empty())
            .unwrap_or(false)
    }

    fn table(&self) -> MutexGuard<'_, LockTable> {
        self.table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

impl Default for FileLockManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalized, de-duplicated, sorted requests. A path declared both shared
/// and exclusive is taken exclusively.
fn canonical_requests(files: &[FileDecl]) -> BTreeMap<PathBuf, LockMode> {
    let mut requests = BTreeMap::new();
    for decl in files {
        let mode = requests
            .entry(normalize_path(&decl.path))
            .or_insert(decl.mode);
        if decl.mode == LockMode::Exclusive {
            *mode = LockMode::Exclusive;
        }
    }
    requests
}

/// Lexical normalization: drops `.` and folds `..` into its parent. Does not
/// touch the filesystem, so symlinks are not resolved.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn excl(path: &str) -> FileDecl {
        FileDecl {
            path: PathBuf::from(path),
            mode: LockMode::Exclusive,
        }
    }

    fn shared(path: &str) -> FileDecl {
        FileDecl {
            path: PathBuf::from(path),
            mode: LockMode::Shared,
        }
    }

    const LONG: Duration = Duration::from_secs(5);

    #[test]
    fn normalizes_lexically() {
        assert_eq!(normalize_path(Path::new("./src/../src/lib.rs")), PathBuf::from("src/lib.rs"));
        assert_eq!(normalize_path(Path::new("../x")), PathBuf::from("../x"));
        assert_eq!(normalize_path(Path::new("/a/../../b")), PathBuf::from("/b"));
    }

    #[tokio::test]
    async fn zero_files_acquires_nothing() {
        let locks = FileLockManager::new();
        let set = locks.acquire(&[], LockHolder::new("a", 1), LONG).await.unwrap();
        assert!(set.is_empty());
        locks.release(set);
        assert!(locks.snapshot().is_empty());
    }

    #[tokio::test]
    async fn exclusive_lock_times_out_and_rolls_back() {
        let locks = FileLockManager::new();
        let first = locks
            .acquire(&[excl("b.txt")], LockHolder::new("first", 1), LONG)
            .await
            .unwrap();

        // Second task takes a.txt first (sorted order), then stalls on b.txt.
        let err = locks
            .acquire(
                &[excl("b.txt"), excl("a.txt")],
                LockHolder::new("second", 2),
                Duration::from_millis(30),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout { ref path, .. } if path == Path::new("b.txt")));
        assert!(!locks.is_locked(Path::new("a.txt")));
        assert_eq!(locks.contention_events(), 1);

        locks.release(first);
        assert!(locks.snapshot().is_empty());
    }

    #[tokio::test]
    async fn release_hands_over_in_fifo_order() {
        let locks = Arc::new(FileLockManager::new());
        let first = locks
            .acquire(&[excl("shared.txt")], LockHolder::new("first", 1), LONG)
            .await
            .unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for (name, dispatch) in [("second", 2u64), ("third", 3)] {
            let locks = locks.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let set = locks
                    .acquire(&[excl("shared.txt")], LockHolder::new(name, dispatch), LONG)
                    .await
                    .unwrap();
                order.lock().unwrap().push(name);
                tokio::time::sleep(Duration::from_millis(5)).await;
                locks.release(set);
            }));
            // Make the queueing order deterministic.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        locks.release(first);
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec!["second", "third"]);
        assert!(locks.snapshot().is_empty());
    }

    #[tokio::test]
    async fn shared_holders_coexist_but_exclude_writers() {
        let locks = FileLockManager::new();
        let r1 = locks
            .acquire(&[shared("cfg.toml")], LockHolder::new("r1", 1), LONG)
            .await
            .unwrap();
        let r2 = locks
            .acquire(&[shared("cfg.toml")], LockHolder::new("r2", 2), LONG)
            .await
            .unwrap();

        let snap = locks.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].mode, LockMode::Shared);
        assert_eq!(snap[0].holders, vec!["r1".to_string(), "r2".to_string()]);

        let err = locks
            .acquire(&[excl("cfg.toml")], LockHolder::new("w", 3), Duration::from_millis(20))
            .await;
        assert!(err.is_err());

        locks.release(r1);
        locks.release(r2);
        let w = locks
            .acquire(&[excl("cfg.toml")], LockHolder::new("w", 3), LONG)
            .await
            .unwrap();
        locks.release(w);
    }

    #[tokio::test]
    async fn mixed_declaration_is_taken_exclusively() {
        let locks = FileLockManager::new();
        let set = locks
            .acquire(
                &[shared("x"), excl("./x")],
                LockHolder::new("t", 1),
                LONG,
            )
            .await
            .unwrap();
        assert_eq!(set.paths().count(), 1);
        assert_eq!(locks.snapshot()[0].mode, LockMode::Exclusive);
        locks.release(set);
    }

    #[tokio::test]
    async fn revoke_frees_paths_and_fences_holder() {
        let locks = Arc::new(FileLockManager::new());
        let dead = LockHolder::new("task", 1);
        let _leaked = locks
            .acquire(&[excl("a"), excl("b")], dead.clone(), LONG)
            .await
            .unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks
                    .acquire(&[excl("a")], LockHolder::new("other", 2), LONG)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut released = locks.revoke(&dead);
        released.sort();
        assert_eq!(released, vec![PathBuf::from("a"), PathBuf::from("b")]);

        let granted = waiter.await.unwrap().unwrap();
        assert_eq!(granted.holder().task_id, "other");

        let err = locks.acquire(&[excl("z")], dead, LONG).await.unwrap_err();
        assert_eq!(err, LockError::Revoked("task".into()));

        // A fresh dispatch of the same task is not fenced.
        let retry = locks
            .acquire(&[excl("b")], LockHolder::new("task", 3), LONG)
            .await
            .unwrap();
        locks.release(retry);
        locks.release(granted);
    }

    #[tokio::test]
    async fn fence_is_one_watermark_per_task() {
        let locks = FileLockManager::new();
        for dispatch in 1..=50 {
            locks.revoke(&LockHolder::new("flaky", dispatch));
        }
        locks.revoke(&LockHolder::new("other", 7));
        assert_eq!(locks.table().revoked.len(), 2);

        for stale in [1, 25, 50] {
            let err = locks
                .acquire(&[excl("f")], LockHolder::new("flaky", stale), LONG)
                .await
                .unwrap_err();
            assert_eq!(err, LockError::Revoked("flaky".into()));
        }

        // Revoking an older dispatch late does not lower the mark.
        locks.revoke(&LockHolder::new("flaky", 3));
        assert!(locks
            .acquire(&[excl("f")], LockHolder::new("flaky", 50), LONG)
            .await
            .is_err());

        let fresh = locks
            .acquire(&[excl("f")], LockHolder::new("flaky", 51), LONG)
            .await
            .unwrap();
        locks.release(fresh);
    }
}
