use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub type TaskId = String;
pub type WorkerId = usize;

/// How a task intends to touch a declared file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    #[default]
    Exclusive,
    Shared,
}

/// A file path a task declares it will touch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDecl {
    pub path: PathBuf,
    #[serde(default)]
    pub mode: LockMode,
}

/// Unit of work submitted to a session.
///
/// `payload` is owned by the host and only ever interpreted by its
/// `WorkExecutor`.
#[derive(Debug, Clone)]
pub struct TaskSpec<P> {
    pub id: TaskId,
    pub declared_files: Vec<FileDecl>,
    pub depends_on: Vec<TaskId>,
    pub payload: P,
}

impl<P> TaskSpec<P> {
    pub fn new(id: impl Into<TaskId>, payload: P) -> Self {
        Self {
            id: id.into(),
            declared_files: Vec::new(),
            depends_on: Vec::new(),
            payload,
        }
    }

    /// Declare an exclusive (write) touch of `path`.
    pub fn touches(mut self, path: impl Into<PathBuf>) -> Self {
        self.declared_files.push(FileDecl {
            path: path.into(),
            mode: LockMode::Exclusive,
        });
        self
    }

    /// Declare a shared (read-only) touch of `path`.
    pub fn reads(mut self, path: impl Into<PathBuf>) -> Self {
        self.declared_files.push(FileDecl {
            path: path.into(),
            mode: LockMode::Shared,
        });
        self
    }

    pub fn depends_on(mut self, id: impl Into<TaskId>) -> Self {
        self.depends_on.push(id.into());
        self
    }
}

/// Common task interface for dependency graph handling.
pub trait TaskLike {
    fn id(&self) -> &str;
    fn dependencies(&self) -> &[TaskId];
}

impl<P> TaskLike for TaskSpec<P> {
    fn id(&self) -> &str {
        &self.id
    }

    fn dependencies(&self) -> &[TaskId] {
        &self.depends_on
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    Assigned,
    Running,
    Completed,
    Failed,
    Blocked,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Blocked)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Assigned | Self::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_declarations() {
        let task = TaskSpec::new("build", ())
            .touches("target/out.bin")
            .reads("Cargo.toml")
            .depends_on("fetch");

        assert_eq!(task.id(), "build");
        assert_eq!(task.dependencies(), &["fetch".to_string()]);
        assert_eq!(task.declared_files.len(), 2);
        assert_eq!(task.declared_files[0].mode, LockMode::Exclusive);
        assert_eq!(task.declared_files[1].mode, LockMode::Shared);
    }

    #[test]
    fn file_decl_defaults_to_exclusive() {
        let decl: FileDecl = serde_json::from_str(r#"{"path":"a.txt"}"#).unwrap();
        assert_eq!(decl.mode, LockMode::Exclusive);
    }
}
