#[allow(clippy::module_inception)]
pub mod error;
pub mod engine;

pub use engine::{
    CycleError, ErrorCode, ErrorKind, ExecutionError, LockError, SessionError, SubmitError,
};
pub use error::CliError;
