use std::path::{Path, PathBuf};

use anyhow::Context;

use super::types::AppConfig;

pub const ENV_CONCURRENCY: &str = "PARALLAX_CONCURRENCY";
pub const ENV_MAX_RETRIES: &str = "PARALLAX_MAX_RETRIES";
pub const ENV_LOG_LEVEL: &str = "PARALLAX_LOG_LEVEL";

/// Default data directory: ~/.parallax
pub fn get_parallax_data_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".parallax"))
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    // Priority 1: ~/.parallax/config.toml
    let data_dir = get_parallax_data_dir()?;
    let home_config = data_dir.join("config.toml");

    // Priority 2: ./parallax.toml
    let local_config = Path::new("parallax.toml");

    let mut cfg = if home_config.exists() {
        read_config(&home_config)?
    } else if local_config.exists() {
        read_config(local_config)?
    } else {
        AppConfig::default()
    };

    fill_data_dirs(&mut cfg, &data_dir);
    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok())?;
    Ok(cfg)
}

/// Load an explicit config file. Env overrides still apply.
pub fn load_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let mut cfg = read_config(path)?;
    if let Ok(data_dir) = get_parallax_data_dir() {
        fill_data_dirs(&mut cfg, &data_dir);
    }
    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok())?;
    Ok(cfg)
}

fn read_config(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    toml::from_str::<AppConfig>(&s)
        .with_context(|| format!("Failed to parse config {}", path.display()))
}

/// Point unset directories at the data directory. Directories are created
/// lazily by whoever writes into them.
fn fill_data_dirs(cfg: &mut AppConfig, data_dir: &Path) {
    fn is_unset(dir: &Option<String>) -> bool {
        dir.as_ref().map(|s| s.trim().is_empty()).unwrap_or(true)
    }

    if is_unset(&cfg.logging.directory) {
        cfg.logging.directory = Some(data_dir.join("logs").to_string_lossy().to_string());
    }
    if is_unset(&cfg.checkpoint.directory) {
        cfg.checkpoint.directory = Some(data_dir.join("checkpoints").to_string_lossy().to_string());
    }
    if is_unset(&cfg.provisioner.base_dir) {
        cfg.provisioner.base_dir = Some(data_dir.join("worktrees").to_string_lossy().to_string());
    }
    if let Some(dir) = &cfg.logging.directory {
        cfg.logging.directory = Some(shellexpand::tilde(dir).into_owned());
    }
    if let Some(dir) = &cfg.checkpoint.directory {
        cfg.checkpoint.directory = Some(shellexpand::tilde(dir).into_owned());
    }
    if let Some(dir) = &cfg.provisioner.base_dir {
        cfg.provisioner.base_dir = Some(shellexpand::tilde(dir).into_owned());
    }
}

/// Environment variable overrides (highest priority).
fn apply_env_overrides(
    cfg: &mut AppConfig,
    var: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = non_empty(ENV_CONCURRENCY) {
        cfg.engine.concurrency = v
            .trim()
            .parse()
            .with_context(|| format!("{ENV_CONCURRENCY} must be a positive integer, got {v:?}"))?;
    }
    if let Some(v) = non_empty(ENV_MAX_RETRIES) {
        cfg.engine.max_retries = v
            .trim()
            .parse()
            .with_context(|| format!("{ENV_MAX_RETRIES} must be an integer, got {v:?}"))?;
    }
    if let Some(v) = non_empty(ENV_LOG_LEVEL) {
        cfg.logging.level = v.trim().to_string();
    }
    Ok(())
}
