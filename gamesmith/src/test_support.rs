//! Scripted doubles for the orchestration loop.
//!
//! Every double records what it was asked through a cloneable handle, so
//! tests can hand the double to a [`Workbench`] and still inspect it.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow};

use crate::agents::{AgentInput, RoleAgent};
use crate::core::routing::SupervisorError;
use crate::core::state::StateView;
use crate::core::types::{ExecutionObservation, ExecutionStatus, Role, RoutingDecision, Target};
use crate::io::oracle::{Oracle, OracleRequest};
use crate::io::paths::TaskPaths;
use crate::io::prompt::PromptEngine;
use crate::io::sandbox::Sandbox;
use crate::step::Workbench;
use crate::supervisor::DecisionEngine;

/// Build a routing decision.
pub fn decision(target: Target, instruction: &str) -> RoutingDecision {
    RoutingDecision::new(target, instruction)
}

/// Write a placeholder image and return its path.
pub fn fake_snapshot(dir: &Path) -> PathBuf {
    let path = dir.join("snapshot.png");
    fs::write(&path, b"\x89PNG\r\n\x1a\n").expect("write fake snapshot");
    path
}

/// Placeholder snapshot in its own temporary directory.
///
/// The image is removed when the returned [`tempfile::TempDir`] drops.
pub fn temp_snapshot() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = fake_snapshot(dir.path());
    (dir, path)
}

/// Author reply holding one fenced block of `code`.
pub fn fenced(language: &str, code: &str) -> String {
    format!("Here you go:\n```{language}\n{code}\n```\n")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Replies handed out either once each, in order, or round-robin forever.
#[derive(Debug, Clone)]
enum Script<T> {
    Queue(VecDeque<T>),
    Cycle { items: Vec<T>, next: usize },
}

impl<T: Clone> Script<T> {
    fn queue(items: impl IntoIterator<Item = T>) -> Self {
        Script::Queue(items.into_iter().collect())
    }

    fn cycle(items: impl IntoIterator<Item = T>) -> Self {
        Script::Cycle {
            items: items.into_iter().collect(),
            next: 0,
        }
    }

    fn next(&mut self) -> Option<T> {
        match self {
            Script::Queue(items) => items.pop_front(),
            Script::Cycle { items, next } => {
                if items.is_empty() {
                    return None;
                }
                let item = items[*next % items.len()].clone();
                *next += 1;
                Some(item)
            }
        }
    }
}

impl<T> Default for Script<T> {
    fn default() -> Self {
        Script::Queue(VecDeque::new())
    }
}

/// Oracle returning scripted replies and recording every request.
#[derive(Debug, Clone, Default)]
pub struct ScriptedOracle {
    inner: Arc<Mutex<OracleInner>>,
}

#[derive(Debug, Default)]
struct OracleInner {
    replies: Script<String>,
    requests: Vec<OracleRequest>,
}

impl ScriptedOracle {
    pub fn new<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(OracleInner {
                replies: Script::queue(replies.into_iter().map(Into::into)),
                requests: Vec::new(),
            })),
        }
    }

    pub fn requests(&self) -> Vec<OracleRequest> {
        lock(&self.inner).requests.clone()
    }
}

impl Oracle for ScriptedOracle {
    fn complete(&self, request: &OracleRequest) -> Result<String> {
        let mut inner = lock(&self.inner);
        inner.requests.push(request.clone());
        inner
            .replies
            .next()
            .ok_or_else(|| anyhow!("scripted oracle has no reply left"))
    }
}

/// Owned copy of what a decision engine was shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenView {
    pub context: String,
    pub has_code: bool,
    pub execution_status: ExecutionStatus,
    pub reviewer_feedback: Option<String>,
    pub designer_feedback: Option<String>,
}

impl From<&StateView<'_>> for SeenView {
    fn from(view: &StateView<'_>) -> Self {
        Self {
            context: view.context.to_string(),
            has_code: view.has_code,
            execution_status: view.execution_status,
            reviewer_feedback: view.reviewer_feedback.map(str::to_string),
            designer_feedback: view.designer_feedback.map(str::to_string),
        }
    }
}

#[derive(Debug, Default)]
struct EngineInner {
    script: Script<RoutingDecision>,
    views: Vec<SeenView>,
}

/// Decision engine that replays scripted decisions.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEngine {
    inner: Arc<Mutex<EngineInner>>,
}

impl ScriptedEngine {
    fn with_script(script: Script<RoutingDecision>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EngineInner {
                script,
                views: Vec::new(),
            })),
        }
    }

    pub fn new(decisions: impl IntoIterator<Item = RoutingDecision>) -> Self {
        Self::with_script(Script::queue(decisions))
    }

    pub fn cycle(decisions: impl IntoIterator<Item = RoutingDecision>) -> Self {
        Self::with_script(Script::cycle(decisions))
    }

    /// Views passed to `decide`, in call order.
    pub fn views(&self) -> Vec<SeenView> {
        lock(&self.inner).views.clone()
    }
}

impl DecisionEngine for ScriptedEngine {
    fn decide(&self, view: &StateView<'_>) -> Result<RoutingDecision, SupervisorError> {
        let mut inner = lock(&self.inner);
        inner.views.push(SeenView::from(view));
        inner
            .script
            .next()
            .ok_or_else(|| SupervisorError::Oracle("no scripted decision left".to_string()))
    }
}

/// Role agent that replays scripted replies and records its inputs.
#[derive(Debug, Clone)]
pub struct ScriptedAgent {
    role: Role,
    inner: Arc<Mutex<AgentInner>>,
}

#[derive(Debug, Default)]
struct AgentInner {
    replies: Script<String>,
    inputs: Vec<AgentInput>,
}

impl ScriptedAgent {
    fn with_script(role: Role, replies: Script<String>) -> Self {
        Self {
            role,
            inner: Arc::new(Mutex::new(AgentInner {
                replies,
                inputs: Vec::new(),
            })),
        }
    }

    pub fn new<S: Into<String>>(role: Role, replies: impl IntoIterator<Item = S>) -> Self {
        Self::with_script(role, Script::queue(replies.into_iter().map(Into::into)))
    }

    pub fn cycle<S: Into<String>>(role: Role, replies: impl IntoIterator<Item = S>) -> Self {
        Self::with_script(role, Script::cycle(replies.into_iter().map(Into::into)))
    }

    pub fn inputs(&self) -> Vec<AgentInput> {
        lock(&self.inner).inputs.clone()
    }
}

impl RoleAgent for ScriptedAgent {
    fn role(&self) -> Role {
        self.role
    }

    fn reply(&mut self, input: AgentInput) -> Result<String> {
        let mut inner = lock(&self.inner);
        inner.inputs.push(input);
        inner
            .replies
            .next()
            .ok_or_else(|| anyhow!("scripted {} has no reply left", self.role))
    }
}

#[derive(Debug, Default)]
struct SandboxInner {
    observations: Script<ExecutionObservation>,
    programs: Vec<String>,
}

/// Sandbox that returns scripted observations and records submitted code.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSandbox {
    inner: Arc<Mutex<SandboxInner>>,
}

impl ScriptedSandbox {
    fn with_script(observations: Script<ExecutionObservation>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SandboxInner {
                observations,
                programs: Vec::new(),
            })),
        }
    }

    pub fn new(observations: impl IntoIterator<Item = ExecutionObservation>) -> Self {
        Self::with_script(Script::queue(observations))
    }

    pub fn cycle(observations: impl IntoIterator<Item = ExecutionObservation>) -> Self {
        Self::with_script(Script::cycle(observations))
    }

    pub fn programs(&self) -> Vec<String> {
        lock(&self.inner).programs.clone()
    }
}

impl Sandbox for ScriptedSandbox {
    fn run(&self, code: &str) -> ExecutionObservation {
        let mut inner = lock(&self.inner);
        inner.programs.push(code.to_string());
        inner
            .observations
            .next()
            .unwrap_or_else(|| ExecutionObservation::Failure {
                diagnostic: "no scripted observation left".to_string(),
            })
    }
}

/// Handles onto the doubles inside a built [`Workbench`].
#[derive(Debug, Clone)]
pub struct WorkbenchHandles {
    pub engine: ScriptedEngine,
    pub author: ScriptedAgent,
    pub code_reviewer: ScriptedAgent,
    pub interface_reviewer: ScriptedAgent,
    pub sandbox: ScriptedSandbox,
}

/// Assembles a [`Workbench`] out of scripted doubles.
pub struct WorkbenchBuilder {
    engine: Option<Box<dyn DecisionEngine>>,
    scripted_engine: ScriptedEngine,
    author: ScriptedAgent,
    code_reviewer: ScriptedAgent,
    interface_reviewer: ScriptedAgent,
    sandbox: ScriptedSandbox,
    artifacts: Option<TaskPaths>,
}

impl Default for WorkbenchBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkbenchBuilder {
    pub fn new() -> Self {
        Self {
            engine: None,
            scripted_engine: ScriptedEngine::default(),
            author: ScriptedAgent::new(Role::Author, Vec::<String>::new()),
            code_reviewer: ScriptedAgent::new(Role::CodeReviewer, Vec::<String>::new()),
            interface_reviewer: ScriptedAgent::new(Role::InterfaceReviewer, Vec::<String>::new()),
            sandbox: ScriptedSandbox::default(),
            artifacts: None,
        }
    }

    pub fn decisions(mut self, decisions: impl IntoIterator<Item = RoutingDecision>) -> Self {
        self.scripted_engine = ScriptedEngine::new(decisions);
        self
    }

    pub fn cycle_decisions(mut self, decisions: impl IntoIterator<Item = RoutingDecision>) -> Self {
        self.scripted_engine = ScriptedEngine::cycle(decisions);
        self
    }

    /// Use a real engine instead of the scripted one.
    pub fn engine(mut self, engine: Box<dyn DecisionEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn author_replies<S: Into<String>>(mut self, replies: impl IntoIterator<Item = S>) -> Self {
        self.author = ScriptedAgent::new(Role::Author, replies);
        self
    }

    pub fn cycle_author_replies<S: Into<String>>(
        mut self,
        replies: impl IntoIterator<Item = S>,
    ) -> Self {
        self.author = ScriptedAgent::cycle(Role::Author, replies);
        self
    }

    pub fn code_reviewer_replies<S: Into<String>>(
        mut self,
        replies: impl IntoIterator<Item = S>,
    ) -> Self {
        self.code_reviewer = ScriptedAgent::new(Role::CodeReviewer, replies);
        self
    }

    pub fn cycle_code_reviewer_replies<S: Into<String>>(
        mut self,
        replies: impl IntoIterator<Item = S>,
    ) -> Self {
        self.code_reviewer = ScriptedAgent::cycle(Role::CodeReviewer, replies);
        self
    }

    pub fn interface_reviewer_replies<S: Into<String>>(
        mut self,
        replies: impl IntoIterator<Item = S>,
    ) -> Self {
        self.interface_reviewer = ScriptedAgent::new(Role::InterfaceReviewer, replies);
        self
    }

    pub fn cycle_interface_reviewer_replies<S: Into<String>>(
        mut self,
        replies: impl IntoIterator<Item = S>,
    ) -> Self {
        self.interface_reviewer = ScriptedAgent::cycle(Role::InterfaceReviewer, replies);
        self
    }

    pub fn observations(
        mut self,
        observations: impl IntoIterator<Item = ExecutionObservation>,
    ) -> Self {
        self.sandbox = ScriptedSandbox::new(observations);
        self
    }

    pub fn cycle_observations(
        mut self,
        observations: impl IntoIterator<Item = ExecutionObservation>,
    ) -> Self {
        self.sandbox = ScriptedSandbox::cycle(observations);
        self
    }

    pub fn artifacts(mut self, paths: TaskPaths) -> Self {
        self.artifacts = Some(paths);
        self
    }

    pub fn build(self) -> (Workbench, WorkbenchHandles) {
        let handles = WorkbenchHandles {
            engine: self.scripted_engine.clone(),
            author: self.author.clone(),
            code_reviewer: self.code_reviewer.clone(),
            interface_reviewer: self.interface_reviewer.clone(),
            sandbox: self.sandbox.clone(),
        };
        let engine = match self.engine {
            Some(engine) => engine,
            None => Box::new(self.scripted_engine) as Box<dyn DecisionEngine>,
        };
        let workbench = Workbench {
            engine,
            author: Box::new(self.author),
            code_reviewer: Box::new(self.code_reviewer),
            interface_reviewer: Box::new(self.interface_reviewer),
            sandbox: Box::new(self.sandbox),
            prompts: Arc::new(PromptEngine::new().expect("prompt templates")),
            artifacts: self.artifacts,
        };
        (workbench, handles)
    }
}
