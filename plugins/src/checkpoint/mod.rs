pub mod file;

pub use file::FileCheckpointStore;
