//! Plan files: the JSON description of a task graph run by `parallax run`.
//!
//! ```json
//! {
//!   "tasks": [
//!     {"id": "gen", "run": "make gen", "files": ["src/gen.rs"]},
//!     {"id": "build", "run": "make", "reads": ["src/gen.rs"], "depends_on": ["gen"]}
//!   ],
//!   "edges": [["gen", "build"]]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parallax_core::error::CliError;
use parallax_core::TaskSpec;
use parallax_plugins::ShellCommand;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    pub tasks: Vec<PlanTask>,

    /// `[from, to]`: `to` depends on `from`.
    #[serde(default)]
    pub edges: Vec<(String, String)>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanTask {
    pub id: String,
    pub run: String,

    /// Files written by the task.
    #[serde(default)]
    pub files: Vec<PathBuf>,

    /// Files only read by the task.
    #[serde(default)]
    pub reads: Vec<PathBuf>,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

/// A parsed plan plus the directory its relative paths resolve against.
#[derive(Debug, Clone)]
pub struct LoadedPlan {
    pub plan: Plan,
    pub base_dir: PathBuf,
}

impl LoadedPlan {
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CliError::Plan(format!("cannot read {}: {e}", path.display())))?;
        let plan = Plan::parse(&raw)
            .map_err(|e| CliError::Plan(format!("{}: {e}", path.display())))?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self { plan, base_dir })
    }

    /// Shell tasks with declared paths anchored at the plan directory.
    pub fn tasks(&self) -> Vec<TaskSpec<ShellCommand>> {
        self.plan
            .tasks
            .iter()
            .map(|t| t.to_spec(&self.base_dir))
            .collect()
    }

    pub fn edges(&self) -> &[(String, String)] {
        &self.plan.edges
    }
}

impl Plan {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl PlanTask {
    fn to_spec(&self, base: &Path) -> TaskSpec<ShellCommand> {
        let mut command = ShellCommand::new(self.run.clone());
        command.env = self.env.clone();
        command.cwd = self.cwd.as_ref().map(|dir| anchor(base, dir));

        let mut spec = TaskSpec::new(self.id.clone(), command);
        for file in &self.files {
            spec = spec.touches(anchor(base, file));
        }
        for file in &self.reads {
            spec = spec.reads(anchor(base, file));
        }
        for dep in &self.depends_on {
            spec = spec.depends_on(dep.clone());
        }
        spec
    }
}

fn anchor(base: &Path, path: &Path) -> PathBuf {
    if path.is_relative() {
        base.join(path)
    } else {
        path.to_path_buf()
    }
}
