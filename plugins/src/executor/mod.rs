pub mod shell;
pub mod tail;

pub use shell::{ShellCommand, ShellExecutor, DEFAULT_TAIL_BYTES};
pub use tail::OutputTail;
