use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::state::Checkpoint;

/// Durable home for session checkpoints. Writes are best effort: the engine
/// logs failures and keeps going.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    fn name(&self) -> &str;

    async fn write(&self, session_id: &str, checkpoint: &Checkpoint) -> anyhow::Result<()>;
}

/// Keeps every checkpoint in memory; handy for embedding and tests.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    written: Mutex<HashMap<String, Vec<Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self, session_id: &str) -> Option<Checkpoint> {
        self.written
            .lock()
            .ok()?
            .get(session_id)
            .and_then(|list| list.last().cloned())
    }

    pub fn count(&self, session_id: &str) -> usize {
        self.written
            .lock()
            .map(|m| m.get(session_id).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(&self, session_id: &str, checkpoint: &Checkpoint) -> anyhow::Result<()> {
        let mut written = self
            .written
            .lock()
            .map_err(|_| anyhow::anyhow!("checkpoint store poisoned"))?;
        written
            .entry(session_id.to_string())
            .or_default()
            .push(checkpoint.clone());
        Ok(())
    }
}
