//! # Session state
//!
//! Session records, their state machine, checkpoints and the
//! [`SessionManager`] that owns every running session.

pub mod manager;
pub mod session;
pub mod snapshot;
pub mod transitions;

pub use manager::{SessionManager, SessionManagerBuilder};
pub use session::{Session, SessionStatus};
pub use snapshot::{Checkpoint, TaskCheckpoint, CHECKPOINT_VERSION};
pub use transitions::{StateTransition, TransitionError};
