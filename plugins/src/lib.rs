//! Reference collaborators for `parallax-core`: a shell executor, a
//! file-backed checkpoint store and a directory provisioner.

pub mod checkpoint;
pub mod executor;
pub mod factory;
pub mod provisioner;

pub use checkpoint::FileCheckpointStore;
pub use executor::{ShellCommand, ShellExecutor};
pub use provisioner::DirectoryProvisioner;
