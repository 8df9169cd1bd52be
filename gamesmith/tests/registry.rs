//! Task registry behavior: submission, polling, waiting, cancellation and
//! failure containment, with scripted workbenches on a real runtime.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Result, bail};
use gamesmith::core::routing::SupervisorError;
use gamesmith::core::state::StateView;
use gamesmith::core::types::{ExecutionObservation, RoutingDecision, TaskStatus, Target};
use gamesmith::io::config::LoopConfig;
use gamesmith::looping::CANCELLED_MESSAGE;
use gamesmith::registry::{INTERNAL_ERROR_MESSAGE, SubmitError, TaskId, TaskRegistry};
use gamesmith::step::Workbench;
use gamesmith::supervisor::{DecisionEngine, RulesDecisionEngine};
use gamesmith::test_support::{WorkbenchBuilder, fenced, temp_snapshot};

/// Routes to the code reviewer forever, pausing on every decision.
struct SlowEngine;

impl DecisionEngine for SlowEngine {
    fn decide(&self, _view: &StateView<'_>) -> Result<RoutingDecision, SupervisorError> {
        thread::sleep(Duration::from_millis(20));
        Ok(RoutingDecision::new(Target::CodeReviewer, "review"))
    }
}

struct PanickingEngine;

impl DecisionEngine for PanickingEngine {
    fn decide(&self, _view: &StateView<'_>) -> Result<RoutingDecision, SupervisorError> {
        panic!("engine exploded");
    }
}

/// Factory whose workbenches finish after both reviewers approve `snapshot`.
fn approving(snapshot: PathBuf) -> impl Fn(&TaskId) -> Result<Workbench> + Send + Sync + 'static {
    move |_: &TaskId| {
        let (workbench, _handles) = WorkbenchBuilder::new()
            .engine(Box::new(RulesDecisionEngine))
            .author_replies([fenced("python", "print('square')")])
            .observations([ExecutionObservation::Success {
                snapshot: snapshot.clone(),
            }])
            .code_reviewer_replies(["APPROVED"])
            .interface_reviewer_replies(["APPROVED"])
            .build();
        Ok(workbench)
    }
}

fn slow_workbench(_id: &TaskId) -> Result<Workbench> {
    let (workbench, _handles) = WorkbenchBuilder::new()
        .engine(Box::new(SlowEngine))
        .build();
    Ok(workbench)
}

fn long_loop() -> LoopConfig {
    LoopConfig {
        max_steps: 10_000,
        ..LoopConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn submitted_task_completes_and_keeps_its_result() {
    let (_temp, snapshot) = temp_snapshot();
    let registry = TaskRegistry::new(approving(snapshot), LoopConfig::default());

    let id = registry.submit("  draw a square  ").expect("submit");
    let snapshot = registry.wait(&id).await.expect("known task");

    assert_eq!(snapshot.id, id);
    assert_eq!(snapshot.prompt, "draw a square");
    assert_eq!(snapshot.status, TaskStatus::Completed);
    assert_eq!(snapshot.step, 5);
    let result = snapshot.result.expect("terminal result");
    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.code.as_deref(), Some("print('square')"));

    let polled = registry.status(&id).expect("status");
    assert_eq!(polled.status, TaskStatus::Completed);
    assert!(polled.result.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn blank_prompt_is_rejected_without_a_record() {
    let (_temp, snapshot) = temp_snapshot();
    let registry = TaskRegistry::new(approving(snapshot), LoopConfig::default());

    assert!(matches!(
        registry.submit(" \n\t "),
        Err(SubmitError::EmptyPrompt)
    ));
    assert!(registry.list().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_task_has_no_status() {
    let (_temp, snapshot) = temp_snapshot();
    let registry = TaskRegistry::new(approving(snapshot), LoopConfig::default());
    let id: TaskId = "6f9619ff-8b86-d011-b42d-00cf4fc964ff"
        .parse()
        .expect("task id");

    assert!(registry.status(&id).is_none());
    assert!(registry.wait(&id).await.is_none());
    assert!(!registry.cancel(&id));
}

#[tokio::test(flavor = "multi_thread")]
async fn list_returns_tasks_in_submission_order() {
    let (_temp, snapshot) = temp_snapshot();
    let registry = TaskRegistry::new(approving(snapshot), LoopConfig::default());

    let first = registry.submit("draw a square").expect("submit");
    let second = registry.submit("draw a circle").expect("submit");
    let third = registry.submit("draw a star").expect("submit");

    let ids: Vec<TaskId> = registry.list().iter().map(|task| task.id).collect();
    assert_eq!(ids, vec![first, second, third]);

    for id in &ids {
        registry.wait(id).await.expect("known task");
    }
    assert!(
        registry
            .list()
            .iter()
            .all(|task| task.status == TaskStatus::Completed)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_stops_a_running_task_between_steps() {
    let registry = TaskRegistry::new(slow_workbench, long_loop());
    let id = registry.submit("draw a square").expect("submit");

    while registry.status(&id).expect("status").step == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(registry.cancel(&id));

    let snapshot = registry.wait(&id).await.expect("known task");
    assert_eq!(snapshot.status, TaskStatus::Failed);
    let result = snapshot.result.expect("terminal result");
    assert_eq!(result.message, CANCELLED_MESSAGE);
    assert!(result.logs.iter().any(|line| line == "Task cancelled."));
    assert!(!registry.cancel(&id), "finished tasks cannot be cancelled");
}

#[tokio::test(flavor = "multi_thread")]
async fn tasks_run_independently() {
    let registry = TaskRegistry::new(slow_workbench, long_loop());
    let cancelled = registry.submit("draw a square").expect("submit");
    let running = registry.submit("draw a circle").expect("submit");

    assert!(registry.cancel(&cancelled));
    let snapshot = registry.wait(&cancelled).await.expect("known task");
    assert_eq!(snapshot.status, TaskStatus::Failed);

    let other = registry.status(&running).expect("status");
    assert!(!other.status.is_terminal());
    assert!(registry.cancel(&running));
    registry.wait(&running).await.expect("known task");
}

#[tokio::test(flavor = "multi_thread")]
async fn setup_failure_is_recorded_as_error() {
    let registry = TaskRegistry::new(
        |_: &TaskId| -> Result<Workbench> { bail!("oracle binary missing") },
        LoopConfig::default(),
    );
    let id = registry.submit("draw a square").expect("submit");

    let snapshot = registry.wait(&id).await.expect("known task");

    assert_eq!(snapshot.status, TaskStatus::Error);
    let result = snapshot.result.expect("terminal result");
    assert!(result.message.contains("oracle binary missing"));
    assert_eq!(result.logs[0], "User request: draw a square");
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_loop_is_contained_as_internal_error() {
    let registry = TaskRegistry::new(
        |_: &TaskId| -> Result<Workbench> {
            let (workbench, _handles) = WorkbenchBuilder::new()
                .engine(Box::new(PanickingEngine))
                .build();
            Ok(workbench)
        },
        LoopConfig::default(),
    );
    let id = registry.submit("draw a square").expect("submit");

    let snapshot = registry.wait(&id).await.expect("known task");

    assert_eq!(snapshot.status, TaskStatus::Error);
    let result = snapshot.result.expect("terminal result");
    assert_eq!(result.message, INTERNAL_ERROR_MESSAGE);

    assert!(
        result
            .logs
            .iter()
            .any(|line| line == "Internal error while running the task.")
    );
    assert_eq!(registry.list()[0].status, TaskStatus::Error);
}
