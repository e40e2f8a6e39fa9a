use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SubmitError;

/// Scheduler, worker pool and health monitor tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of worker slots.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Retries allowed after the first attempt, shared between executor
    /// failures and worker deaths.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Silence after which a busy worker is declared unresponsive.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// Upper bound on waiting for a single declared file.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// 0 disables periodic checkpoints (pause and session end still write one).
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,

    /// How long in-flight executors get to honor cancellation on abort.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,

    /// Replace workers declared unresponsive.
    #[serde(default = "default_respawn_workers")]
    pub respawn_workers: bool,

    /// Broadcast buffer of the event bus.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_concurrency() -> usize {
    4
}

fn default_max_retries() -> u32 {
    2
}

fn default_heartbeat_interval_ms() -> u64 {
    500
}

fn default_heartbeat_timeout_ms() -> u64 {
    5_000
}

fn default_lock_timeout_ms() -> u64 {
    30_000
}

fn default_checkpoint_interval_ms() -> u64 {
    10_000
}

fn default_cancel_grace_ms() -> u64 {
    2_000
}

fn default_respawn_workers() -> bool {
    true
}

fn default_event_capacity() -> usize {
    4096
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
            checkpoint_interval_ms: default_checkpoint_interval_ms(),
            cancel_grace_ms: default_cancel_grace_ms(),
            respawn_workers: default_respawn_workers(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn checkpoint_interval(&self) -> Option<Duration> {
        (self.checkpoint_interval_ms > 0).then(|| Duration::from_millis(self.checkpoint_interval_ms))
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn validate(&self) -> Result<(), SubmitError> {
        if self.concurrency == 0 {
            return Err(SubmitError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(SubmitError::InvalidConfig(
                "heartbeat_interval_ms must be positive".to_string(),
            ));
        }
        // A timeout at or below the interval flags healthy workers between two beats.
        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            return Err(SubmitError::InvalidConfig(format!(
                "heartbeat_timeout_ms ({}) must exceed heartbeat_interval_ms ({})",
                self.heartbeat_timeout_ms, self.heartbeat_interval_ms
            )));
        }
        if self.event_capacity == 0 {
            return Err(SubmitError::InvalidConfig(
                "event_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.checkpoint_interval(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn rejects_zero_concurrency() {
        let cfg = EngineConfig {
            concurrency: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(SubmitError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_timeout_not_exceeding_interval() {
        let cfg = EngineConfig {
            heartbeat_interval_ms: 100,
            heartbeat_timeout_ms: 100,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: EngineConfig = toml::from_str("concurrency = 8\ncheckpoint_interval_ms = 0").unwrap();
        assert_eq!(cfg.concurrency, 8);
        assert_eq!(cfg.max_retries, 2);
        assert_eq!(cfg.checkpoint_interval(), None);
    }
}
