use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EventsOutConfig;
use crate::events::EventBus;

/// `path` value that writes to stdout instead of a file.
pub const STDOUT_TARGET: &str = "stdout:";

fn audit_preview(s: &str) -> String {
    const MAX: usize = 120;
    if s.len() <= MAX {
        return s.to_string();
    }
    let end = s
        .char_indices()
        .take_while(|(i, _)| *i < MAX)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    let mut out = s[..end].to_string();
    out.push_str("...");
    out
}

/// Running JSONL sink. Lines that could not be queued are counted, not
/// retried.
pub struct EventsOut {
    dropped: Arc<AtomicU64>,
    stop: CancellationToken,
    forwarder: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl EventsOut {
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Write out everything published so far, flush and stop.
    pub async fn close(self) -> u64 {
        self.stop.cancel();
        let _ = self.forwarder.await;
        let _ = self.writer.await;
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Subscribe to `bus` and append every envelope as one JSON line.
pub async fn start_events_out(
    cfg: &EventsOutConfig,
    bus: &EventBus,
) -> anyhow::Result<Option<EventsOut>> {
    if !cfg.enabled || cfg.path.trim().is_empty() {
        return Ok(None);
    }

    let path = cfg.path.clone();
    let mut writer: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = if path == STDOUT_TARGET {
        Box::new(tokio::io::stdout())
    } else {
        if let Some(parent) = Path::new(&path).parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open events output {path}"))?;
        Box::new(file)
    };

    let (tx, mut rx) = mpsc::channel::<String>(cfg.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let stop = CancellationToken::new();
    let drop_when_full = cfg.drop_when_full;

    let mut events = bus.subscribe();
    let forwarder = {
        let dropped = Arc::clone(&dropped);
        let stop = stop.clone();
        tokio::spawn(async move {
            loop {
                // Drain what is already buffered before honoring stop.
                let received = tokio::select! {
                    biased;
                    received = events.recv() => received,
                    _ = stop.cancelled() => break,
                };
                let envelope = match received {
                    Ok(envelope) => envelope,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "events_out fell behind the event bus");
                        dropped.fetch_add(missed, Ordering::Relaxed);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let line = match serde_json::to_string(&envelope) {
                    Ok(line) => line,
                    Err(err) => {
                        tracing::warn!("failed to serialize event: {err}");
                        continue;
                    }
                };
                if drop_when_full {
                    if tx.try_send(line).is_err() {
                        dropped.fetch_add(1, Ordering::Relaxed);
                    }
                } else if tx.send(line).await.is_err() {
                    break;
                }
            }
        })
    };

    let writer = tokio::spawn(async move {
        while let Some(mut line) = rx.recv().await {
            if !line.ends_with('\n') {
                line.push('\n');
            }
            if path == STDOUT_TARGET {
                tracing::debug!(
                    target: "parallax.stdout_audit",
                    kind = "events_out",
                    bytes = line.len(),
                    preview = %audit_preview(line.trim_end())
                );
            }
            if let Err(err) = writer.write_all(line.as_bytes()).await {
                tracing::warn!(path = %path, "events_out write failed: {err}");
                return;
            }
        }
        let _ = writer.flush().await;
    });

    Ok(Some(EventsOut {
        dropped,
        stop,
        forwarder,
        writer,
    }))
}
