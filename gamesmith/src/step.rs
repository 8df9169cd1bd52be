//! One orchestration step: ask the supervisor, dispatch, fold the outcome
//! into the project state.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::agents::{AgentInput, RoleAgent};
use crate::core::extract::extract_code_block;
use crate::core::policy::finish_allowed;
use crate::core::routing::SupervisorError;
use crate::core::run_log::RunLog;
use crate::core::state::{ProjectState, Reviewer};
use crate::core::types::{
    ExecutionObservation, ExecutionStatus, NO_IMAGE_FEEDBACK, RoutingDecision, TaskStatus, Target,
};
use crate::io::artifacts::write_step_decision;
use crate::io::paths::TaskPaths;
use crate::io::prompt::{AuthorTurn, PromptEngine};
use crate::io::sandbox::Sandbox;
use crate::supervisor::DecisionEngine;

/// Collaborators owned by one task.
pub struct Workbench {
    pub engine: Box<dyn DecisionEngine>,
    pub author: Box<dyn RoleAgent>,
    pub code_reviewer: Box<dyn RoleAgent>,
    pub interface_reviewer: Box<dyn RoleAgent>,
    pub sandbox: Box<dyn Sandbox + Send>,
    pub prompts: Arc<PromptEngine>,
    /// Where per-step artifacts go; `None` keeps the run in memory only.
    pub artifacts: Option<TaskPaths>,
}

/// What the loop should do after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepFlow {
    Continue,
    Finish,
    Abort { status: TaskStatus, message: String },
}

impl StepFlow {
    fn supervisor_failure(err: &SupervisorError) -> Self {
        StepFlow::Abort {
            status: TaskStatus::Error,
            message: format!("Supervisor failed: {err}"),
        }
    }
}

/// Append to the run log and mirror the entry to tracing.
pub(crate) fn note(log: &mut RunLog, entry: impl Into<String>) {
    let entry = entry.into();
    info!(target: "gamesmith::run", "{entry}");
    log.push(entry);
}

/// Run step `step` (1-indexed) against `state`.
pub fn run_step(
    step: u32,
    workbench: &mut Workbench,
    state: &mut ProjectState,
    log: &mut RunLog,
    language: &str,
) -> StepFlow {
    let decision = match workbench.engine.decide(&state.view()) {
        Ok(decision) => decision,
        Err(err) => {
            note(log, format!("Supervisor error: {err}"));
            return StepFlow::supervisor_failure(&err);
        }
    };
    note(log, format!("Supervisor decision -> {}", decision.target));
    note(log, format!("Instruction: {}", decision.instruction));
    if let Some(paths) = &workbench.artifacts
        && let Err(err) = write_step_decision(paths, step, &decision)
    {
        warn!(step, err = %format!("{err:#}"), "failed to write step decision");
    }

    match &decision.target {
        Target::Finish => finish(state, log),
        Target::Execute => execute(workbench, state, log),
        Target::Author => {
            author(workbench, state, log, &decision, language);
            StepFlow::Continue
        }
        Target::CodeReviewer => {
            code_review(workbench, state, log, &decision, language);
            StepFlow::Continue
        }
        Target::InterfaceReviewer => {
            interface_review(workbench, state, log, &decision);
            StepFlow::Continue
        }
        Target::Unrecognized(raw) => {
            let err = SupervisorError::InvalidTarget(raw.clone());
            note(log, format!("Supervisor error: {err}"));
            StepFlow::supervisor_failure(&err)
        }
    }
}

fn finish(state: &ProjectState, log: &mut RunLog) -> StepFlow {
    match finish_allowed(&state.view()) {
        Ok(()) => {
            note(log, "Process completed. Product approved.");
            StepFlow::Finish
        }
        Err(err) => {
            note(log, format!("Supervisor error: {err}"));
            StepFlow::supervisor_failure(&err)
        }
    }
}

fn execute(workbench: &mut Workbench, state: &mut ProjectState, log: &mut RunLog) -> StepFlow {
    let Some(code) = state.latest_code() else {
        let message = "Supervisor requested execution but no code is available.";
        note(log, format!("[System error] {message}"));
        return StepFlow::Abort {
            status: TaskStatus::Failed,
            message: message.to_string(),
        };
    };
    let observation = workbench.sandbox.run(code);
    match &observation {
        ExecutionObservation::Success { snapshot } => {
            note(
                log,
                format!("[Execution] Success. Snapshot: {}", snapshot.display()),
            );
        }
        ExecutionObservation::Failure { diagnostic } => {
            note(log, "[Execution] Code execution failed.");
            note(log, diagnostic.clone());
        }
    }
    state.record_execution(observation);
    StepFlow::Continue
}

fn author(
    workbench: &mut Workbench,
    state: &mut ProjectState,
    log: &mut RunLog,
    decision: &RoutingDecision,
    language: &str,
) {
    let turn = AuthorTurn {
        instruction: &decision.instruction,
        runtime_error: (state.execution_status() == ExecutionStatus::Error)
            .then(|| state.context()),
        reviewer_feedback: state.reviewer_feedback(),
        designer_feedback: state.designer_feedback(),
    };
    let reply = workbench
        .prompts
        .author_turn(&turn)
        .and_then(|message| workbench.author.reply(AgentInput::Text(message)));

    match reply {
        Ok(reply) => match extract_code_block(&reply, language) {
            Ok(code) => {
                state.record_code(code);
                note(
                    log,
                    format!("[Author] Submitted new code (revision {}).", state.revision()),
                );
            }
            Err(err) => {
                note(log, format!("[Author] Invalid code format: {err}"));
                state.note_context(format!(
                    "Author did not return exactly one ```{language} ... ``` block: {err}"
                ));
            }
        },
        Err(err) => {
            note(log, format!("[Author] Error: {err:#}"));
            state.note_context(format!("Author call failed: {err:#}"));
        }
    }
}

fn code_review(
    workbench: &mut Workbench,
    state: &mut ProjectState,
    log: &mut RunLog,
    decision: &RoutingDecision,
    language: &str,
) {
    let Some(code) = state.latest_code() else {
        note(log, "[System error] No code to review.");
        return;
    };
    let reply = workbench
        .prompts
        .code_review_turn(&decision.instruction, code, language)
        .and_then(|message| workbench.code_reviewer.reply(AgentInput::Text(message)));
    match reply {
        Ok(feedback) => {
            note(log, format!("[CodeReviewer] {feedback}"));
            state.record_review(Reviewer::Code, feedback);
        }
        Err(err) => {
            note(log, format!("[CodeReviewer] Error: {err:#}"));
            state.note_context(format!("Code reviewer call failed: {err:#}"));
        }
    }
}

fn interface_review(
    workbench: &mut Workbench,
    state: &mut ProjectState,
    log: &mut RunLog,
    decision: &RoutingDecision,
) {
    let snapshot = state
        .latest_snapshot()
        .filter(|path| Path::exists(path))
        .map(Path::to_path_buf);
    let Some(image) = snapshot else {
        note(log, "[System error] Snapshot not found for interface review.");
        state.record_review(Reviewer::Interface, NO_IMAGE_FEEDBACK);
        return;
    };
    let input = AgentInput::TextWithImage {
        text: decision.instruction.clone(),
        image,
    };
    match workbench.interface_reviewer.reply(input) {
        Ok(feedback) => {
            note(log, format!("[InterfaceReviewer] {feedback}"));
            state.record_review(Reviewer::Interface, feedback);
        }
        Err(err) => {
            note(log, format!("[InterfaceReviewer] Error: {err:#}"));
            state.note_context(format!("Interface reviewer call failed: {err:#}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{WorkbenchBuilder, decision};

    #[test]
    fn execute_without_code_fails_the_task() {
        let (mut workbench, _handles) = WorkbenchBuilder::new()
            .decisions([decision(Target::Execute, "run")])
            .build();
        let mut state = ProjectState::new("draw a square");
        let mut log = RunLog::new();

        let flow = run_step(1, &mut workbench, &mut state, &mut log, "python");

        assert_eq!(
            flow,
            StepFlow::Abort {
                status: TaskStatus::Failed,
                message: "Supervisor requested execution but no code is available.".to_string(),
            }
        );
    }

    #[test]
    fn malformed_author_reply_only_updates_context() {
        let (mut workbench, handles) = WorkbenchBuilder::new()
            .decisions([decision(Target::Author, "write it")])
            .author_replies(["Here is my plan, no code yet."])
            .build();
        let mut state = ProjectState::new("draw a square");
        let mut log = RunLog::new();

        let flow = run_step(1, &mut workbench, &mut state, &mut log, "python");

        assert_eq!(flow, StepFlow::Continue);
        assert_eq!(state.latest_code(), None);
        assert!(state.context().contains("did not return exactly one"));
        assert_eq!(handles.author.inputs().len(), 1);
    }

    #[test]
    fn author_prompt_carries_runtime_error() {
        let (mut workbench, handles) = WorkbenchBuilder::new()
            .decisions([decision(Target::Author, "fix the crash")])
            .author_replies(["```python\nprint('fixed')\n```"])
            .build();
        let mut state = ProjectState::new("draw a square");
        state.record_code("print(");
        state.record_execution(ExecutionObservation::Failure {
            diagnostic: "SyntaxError: unexpected EOF".to_string(),
        });
        let mut log = RunLog::new();

        run_step(1, &mut workbench, &mut state, &mut log, "python");

        let inputs = handles.author.inputs();
        assert!(inputs[0].text().starts_with("fix the crash"));
        assert!(inputs[0].text().contains("SyntaxError: unexpected EOF"));
        assert_eq!(state.latest_code(), Some("print('fixed')"));
        assert_eq!(state.execution_status(), ExecutionStatus::Unknown);
    }

    #[test]
    fn interface_review_without_snapshot_skips_the_agent() {
        let (mut workbench, handles) = WorkbenchBuilder::new()
            .decisions([decision(Target::InterfaceReviewer, "look")])
            .build();
        let mut state = ProjectState::new("draw a square");
        state.record_code("print(1)");
        let mut log = RunLog::new();

        let flow = run_step(1, &mut workbench, &mut state, &mut log, "python");

        assert_eq!(flow, StepFlow::Continue);
        assert_eq!(state.designer_feedback(), Some(NO_IMAGE_FEEDBACK));
        assert!(handles.interface_reviewer.inputs().is_empty());
    }

    #[test]
    fn code_review_without_code_is_skipped() {
        let (mut workbench, handles) = WorkbenchBuilder::new()
            .decisions([decision(Target::CodeReviewer, "review")])
            .build();
        let mut state = ProjectState::new("draw a square");
        let mut log = RunLog::new();

        let flow = run_step(1, &mut workbench, &mut state, &mut log, "python");

        assert_eq!(flow, StepFlow::Continue);
        assert!(handles.code_reviewer.inputs().is_empty());
        assert!(
            log.entries()
                .iter()
                .any(|entry| entry.contains("No code to review"))
        );
    }

    #[test]
    fn premature_finish_is_a_policy_violation() {
        let (mut workbench, _handles) = WorkbenchBuilder::new()
            .decisions([decision(Target::Finish, "done")])
            .build();
        let mut state = ProjectState::new("draw a square");
        state.record_code("print(1)");
        let mut log = RunLog::new();

        let flow = run_step(1, &mut workbench, &mut state, &mut log, "python");

        match flow {
            StepFlow::Abort { status, message } => {
                assert_eq!(status, TaskStatus::Error);
                assert!(message.contains("executed successfully"));
            }
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[test]
    fn failed_agent_call_is_recoverable() {
        let (mut workbench, _handles) = WorkbenchBuilder::new()
            .decisions([decision(Target::Author, "write")])
            .build();
        let mut state = ProjectState::new("draw a square");
        let mut log = RunLog::new();

        let flow = run_step(1, &mut workbench, &mut state, &mut log, "python");

        assert_eq!(flow, StepFlow::Continue);
        assert!(state.context().starts_with("Author call failed"));
    }
}
