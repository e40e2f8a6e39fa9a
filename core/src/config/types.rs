use serde::{Deserialize, Serialize};

use crate::executor::types::EngineConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub events_out: EventsOutConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub provisioner: ProvisionerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory`.
    #[serde(default = "default_logging_file")]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "parallax_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Directory for log files. Defaults to ~/.parallax/logs.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_file() -> bool {
    false
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: default_logging_file(),
            level: default_logging_level(),
            directory: None,
        }
    }
}

/// JSONL event stream written alongside a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsOutConfig {
    #[serde(default)]
    pub enabled: bool,

    /// File path, or `stdout:`.
    #[serde(default = "default_events_out_path")]
    pub path: String,

    #[serde(default = "default_events_out_capacity")]
    pub channel_capacity: usize,

    #[serde(default = "default_drop_when_full")]
    pub drop_when_full: bool,
}

fn default_events_out_path() -> String {
    "./parallax.events.jsonl".to_string()
}

fn default_events_out_capacity() -> usize {
    2048
}

fn default_drop_when_full() -> bool {
    true
}

impl Default for EventsOutConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_events_out_path(),
            channel_capacity: default_events_out_capacity(),
            drop_when_full: default_drop_when_full(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_enabled")]
    pub enabled: bool,

    /// Defaults to ~/.parallax/checkpoints.
    #[serde(default)]
    pub directory: Option<String>,

    /// Newest checkpoints kept per session.
    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: usize,
}

fn default_checkpoint_enabled() -> bool {
    true
}

fn default_max_snapshots() -> usize {
    5
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: default_checkpoint_enabled(),
            directory: None,
            max_snapshots: default_max_snapshots(),
        }
    }
}

/// Per-task scratch roots. Off by default: tasks run against the paths
/// they declare.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Parent of the per-task roots. Defaults to ~/.parallax/worktrees.
    #[serde(default)]
    pub base_dir: Option<String>,
}
