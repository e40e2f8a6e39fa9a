pub mod dir;

pub use dir::DirectoryProvisioner;
