use thiserror::Error;

use super::engine::{SessionError, SubmitError};

#[derive(Error, Debug)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(String),
    #[error("plan error: {0}")]
    Plan(String),
    #[error("invalid task graph: {0}")]
    Submit(#[from] SubmitError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("command failed: {0}")]
    Command(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}
