//! The bounded orchestration loop for one task.

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::core::run_log::RunLog;
use crate::core::state::ProjectState;
use crate::core::types::{TaskResult, TaskStatus};
use crate::io::artifacts::write_result;
use crate::io::config::LoopConfig;
use crate::step::{StepFlow, Workbench, note, run_step};

/// Message recorded when a task is cancelled between steps.
pub const CANCELLED_MESSAGE: &str = "cancelled";

/// Drive `workbench` from `prompt` to a terminal result.
///
/// Stops on `Finish`, on a fatal step, on cancellation (checked before every
/// step) or when `config.max_steps` decisions have been made. The result
/// always carries the latest code, snapshot and the full run log.
/// `on_step` is called with the 1-indexed step number before each step runs.
#[instrument(skip_all, fields(max_steps = config.max_steps))]
pub fn run_loop<F: FnMut(u32)>(
    prompt: &str,
    workbench: &mut Workbench,
    config: &LoopConfig,
    cancel: &CancellationToken,
    mut on_step: F,
) -> TaskResult {
    let mut state = ProjectState::new(prompt);
    let mut log = RunLog::new();
    note(&mut log, format!("User request: {prompt}"));

    let (status, message) = drive(
        workbench,
        &mut state,
        &mut log,
        config,
        cancel,
        &mut on_step,
    );
    note(&mut log, format!("Final status: {status} ({message})"));
    info!(status = %status, revisions = state.revision(), "loop finished");

    let (code, snapshot_path) = state.into_artifacts();
    let result = TaskResult {
        status,
        message,
        code,
        snapshot_path,
        logs: log.into_entries(),
    };
    if let Some(paths) = &workbench.artifacts
        && let Err(err) = write_result(paths, &result)
    {
        warn!(err = %format!("{err:#}"), "failed to write task result");
    }
    result
}

fn drive(
    workbench: &mut Workbench,
    state: &mut ProjectState,
    log: &mut RunLog,
    config: &LoopConfig,
    cancel: &CancellationToken,
    on_step: &mut dyn FnMut(u32),
) -> (TaskStatus, String) {
    for step in 1..=config.max_steps {
        if cancel.is_cancelled() {
            note(log, "Task cancelled.");
            return (TaskStatus::Failed, CANCELLED_MESSAGE.to_string());
        }
        note(log, format!("===== Step {step} ====="));
        on_step(step);
        match run_step(step, workbench, state, log, &config.code_language) {
            StepFlow::Continue => {}
            StepFlow::Finish => {
                return (
                    TaskStatus::Completed,
                    "Task completed successfully.".to_string(),
                );
            }
            StepFlow::Abort { status, message } => return (status, message),
        }
    }
    let message = format!(
        "Reached max steps ({}) without finishing.",
        config.max_steps
    );
    note(log, message.clone());
    (TaskStatus::Failed, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Target;
    use crate::test_support::{WorkbenchBuilder, decision};

    #[test]
    fn cancelled_token_stops_before_first_step() {
        let (mut workbench, handles) = WorkbenchBuilder::new()
            .decisions([decision(Target::Author, "write")])
            .build();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_loop(
            "draw a square",
            &mut workbench,
            &LoopConfig::default(),
            &cancel,
            |_| {},
        );

        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.message, CANCELLED_MESSAGE);
        assert!(handles.engine.views().is_empty());
        assert!(!result.logs.is_empty());
    }

    #[test]
    fn on_step_sees_every_step_number() {
        let (mut workbench, _handles) = WorkbenchBuilder::new()
            .cycle_decisions([decision(Target::CodeReviewer, "review")])
            .build();
        let mut seen = Vec::new();

        let result = run_loop(
            "draw a square",
            &mut workbench,
            &LoopConfig {
                max_steps: 3,
                ..LoopConfig::default()
            },
            &CancellationToken::new(),
            |step| seen.push(step),
        );

        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(result.message, "Reached max steps (3) without finishing.");
    }

    #[test]
    fn artifacts_are_written_when_configured() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = crate::io::paths::TaskPaths::new(temp.path(), "program.py");
        let (mut workbench, _handles) = WorkbenchBuilder::new()
            .decisions([decision(Target::Execute, "run")])
            .artifacts(paths.clone())
            .build();

        let result = run_loop(
            "draw a square",
            &mut workbench,
            &LoopConfig::default(),
            &CancellationToken::new(),
            |_| {},
        );

        assert_eq!(result.status, TaskStatus::Failed);
        assert!(paths.step_dir(1).join("decision.json").exists());
        assert!(paths.result_path.exists());
        assert!(paths.run_log_path.exists());
    }
}
