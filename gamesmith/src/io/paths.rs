//! Canonical locations under `.gamesmith/` for a project root.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Workspace-level paths shared by every task.
#[derive(Debug, Clone)]
pub struct StudioPaths {
    pub root: PathBuf,
    pub studio_dir: PathBuf,
    pub config_path: PathBuf,
    pub tasks_dir: PathBuf,
}

impl StudioPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let studio_dir = root.join(".gamesmith");
        Self {
            root: root.clone(),
            config_path: studio_dir.join("config.toml"),
            tasks_dir: studio_dir.join("tasks"),
            studio_dir,
        }
    }

    pub fn task(&self, task_id: &str, program_file: &str) -> TaskPaths {
        TaskPaths::new(self.tasks_dir.join(task_id), program_file)
    }
}

/// Scratch paths owned by exactly one task, so parallel tasks never collide.
#[derive(Debug, Clone)]
pub struct TaskPaths {
    pub dir: PathBuf,
    pub program_path: PathBuf,
    pub snapshot_path: PathBuf,
    pub routing_schema_path: PathBuf,
    pub oracle_dir: PathBuf,
    pub steps_dir: PathBuf,
    pub result_path: PathBuf,
    pub run_log_path: PathBuf,
}

impl TaskPaths {
    pub fn new(dir: impl Into<PathBuf>, program_file: &str) -> Self {
        let dir = dir.into();
        Self {
            program_path: dir.join(program_file),
            snapshot_path: dir.join("snapshot.png"),
            routing_schema_path: dir.join("routing_decision.schema.json"),
            oracle_dir: dir.join("oracle"),
            steps_dir: dir.join("steps"),
            result_path: dir.join("result.json"),
            run_log_path: dir.join("run.log"),
            dir,
        }
    }

    /// Directory for the artifacts of step `step` (1-indexed).
    pub fn step_dir(&self, step: u32) -> PathBuf {
        self.steps_dir.join(step.to_string())
    }

    pub fn ensure(&self) -> Result<()> {
        ensure_dir(&self.dir)?;
        ensure_dir(&self.oracle_dir)
    }
}

pub(crate) fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}
