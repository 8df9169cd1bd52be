//! Per-task artifact files under `.gamesmith/tasks/<id>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{RoutingDecision, TaskResult};
use crate::io::paths::{TaskPaths, ensure_dir};

#[derive(Debug, Clone, Serialize)]
struct DecisionRecord<'a> {
    step: u32,
    target: &'a str,
    instruction: &'a str,
}

/// Write `steps/<step>/decision.json`.
pub fn write_step_decision(
    paths: &TaskPaths,
    step: u32,
    decision: &RoutingDecision,
) -> Result<PathBuf> {
    let dir = paths.step_dir(step);
    ensure_dir(&dir)?;
    let path = dir.join("decision.json");
    write_json(
        &path,
        &DecisionRecord {
            step,
            target: decision.target.as_str(),
            instruction: &decision.instruction,
        },
    )?;
    Ok(path)
}

/// Write `result.json` and `run.log` for a finished task.
pub fn write_result(paths: &TaskPaths, result: &TaskResult) -> Result<()> {
    ensure_dir(&paths.dir)?;
    write_json(&paths.result_path, result)?;
    let mut log = result.logs.join("\n");
    log.push('\n');
    write_text(&paths.run_log_path, &log)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_text(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{TaskStatus, Target};

    #[test]
    fn writes_step_decision_under_step_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = TaskPaths::new(temp.path(), "program.py");
        let decision = RoutingDecision::new(Target::Execute, "run it");

        let path = write_step_decision(&paths, 2, &decision).expect("write");

        assert!(path.ends_with(Path::new("steps/2/decision.json")));
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(value["target"], "Execute");
        assert_eq!(value["instruction"], "run it");
        assert_eq!(value["step"], 2);
    }

    #[test]
    fn writes_result_and_run_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = TaskPaths::new(temp.path().join("task"), "program.py");
        let result = TaskResult {
            status: TaskStatus::Failed,
            message: "Reached max steps (2) without finishing.".to_string(),
            code: Some("print(1)".to_string()),
            snapshot_path: None,
            logs: vec!["User request: x".to_string(), "Step 1".to_string()],
        };

        write_result(&paths, &result).expect("write");

        let loaded: TaskResult =
            serde_json::from_str(&fs::read_to_string(&paths.result_path).expect("read"))
                .expect("json");
        assert_eq!(loaded, result);
        let log = fs::read_to_string(&paths.run_log_path).expect("read log");
        assert_eq!(log, "User request: x\nStep 1\n");
    }
}
