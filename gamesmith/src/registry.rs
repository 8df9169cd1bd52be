//! In-process task registry and asynchronous runner.
//!
//! Each submitted prompt gets its own record, its own cancellation token and
//! its own loop running on the blocking pool. The map is behind an `RwLock`;
//! each record has its own `Mutex`, written only by the task's runner.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::core::types::{TaskResult, TaskStatus};
use crate::io::config::LoopConfig;
use crate::looping::run_loop;
use crate::step::Workbench;

/// Message recorded when the loop panics.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal error";

/// Opaque task identifier (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(raw.trim()).map(Self)
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("no async runtime available: {0}")]
    NoRuntime(String),
}

/// Point-in-time copy of a task record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub prompt: String,
    pub status: TaskStatus,
    /// Last step the loop started (0 before the first step).
    pub step: u32,
    /// Present only once the task is terminal.
    pub result: Option<TaskResult>,
    pub created_at: DateTime<Utc>,
}

/// Builds the collaborators for one task.
pub trait WorkbenchFactory: Send + Sync + 'static {
    fn build(&self, id: &TaskId) -> Result<Workbench>;
}

impl<F> WorkbenchFactory for F
where
    F: Fn(&TaskId) -> Result<Workbench> + Send + Sync + 'static,
{
    fn build(&self, id: &TaskId) -> Result<Workbench> {
        self(id)
    }
}

struct TaskEntry {
    seq: u64,
    record: Mutex<TaskSnapshot>,
    status: watch::Sender<TaskStatus>,
    cancel: CancellationToken,
}

impl TaskEntry {
    fn record(&self) -> MutexGuard<'_, TaskSnapshot> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> TaskSnapshot {
        self.record().clone()
    }

    fn mark_running(&self) {
        self.record().status = TaskStatus::Running;
        self.status.send_replace(TaskStatus::Running);
    }

    fn mark_step(&self, step: u32) {
        self.record().step = step;
    }

    /// Store the result before publishing the terminal status, so a waiter
    /// woken by the status always sees the result.
    fn finish(&self, result: TaskResult) {
        let status = result.status;
        {
            let mut record = self.record();
            record.status = status;
            record.result = Some(result);
        }
        self.status.send_replace(status);
    }
}

struct RegistryInner {
    tasks: RwLock<HashMap<TaskId, Arc<TaskEntry>>>,
    factory: Arc<dyn WorkbenchFactory>,
    config: LoopConfig,
    next_seq: AtomicU64,
}

/// Registry of submitted tasks. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<RegistryInner>,
}

impl TaskRegistry {
    pub fn new(factory: impl WorkbenchFactory, config: LoopConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                tasks: RwLock::new(HashMap::new()),
                factory: Arc::new(factory),
                config,
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Accept a prompt and start its loop on the blocking pool.
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(skip_all)]
    pub fn submit(&self, prompt: &str) -> Result<TaskId, SubmitError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(SubmitError::EmptyPrompt);
        }
        let handle = Handle::try_current().map_err(|err| SubmitError::NoRuntime(err.to_string()))?;

        let id = TaskId::new();
        let (status, _) = watch::channel(TaskStatus::Submitted);
        let entry = Arc::new(TaskEntry {
            seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
            record: Mutex::new(TaskSnapshot {
                id,
                prompt: prompt.to_string(),
                status: TaskStatus::Submitted,
                step: 0,
                result: None,
                created_at: Utc::now(),
            }),
            status,
            cancel: CancellationToken::new(),
        });
        self.inner
            .tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&entry));
        info!(task = %id, "task submitted");

        let factory = Arc::clone(&self.inner.factory);
        let config = self.inner.config.clone();
        let prompt = prompt.to_string();
        handle.spawn_blocking(move || run_task(id, &prompt, &entry, factory.as_ref(), &config));
        Ok(id)
    }

    /// Snapshot of one task; `None` for an unknown id.
    pub fn status(&self, id: &TaskId) -> Option<TaskSnapshot> {
        self.entry(id).map(|entry| entry.snapshot())
    }

    /// All tasks, oldest first.
    pub fn list(&self) -> Vec<TaskSnapshot> {
        let mut entries: Vec<Arc<TaskEntry>> = self
            .inner
            .tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.iter().map(|entry| entry.snapshot()).collect()
    }

    /// Wait until the task reaches a terminal status.
    pub async fn wait(&self, id: &TaskId) -> Option<TaskSnapshot> {
        let entry = self.entry(id)?;
        let mut updates = entry.status.subscribe();
        // The sender lives in the entry, so the channel cannot close here.
        let _ = updates.wait_for(|status| status.is_terminal()).await;
        Some(entry.snapshot())
    }

    /// Request cancellation. Takes effect before the task's next step.
    ///
    /// Returns `false` for unknown or already finished tasks.
    pub fn cancel(&self, id: &TaskId) -> bool {
        let Some(entry) = self.entry(id) else {
            return false;
        };
        if entry.snapshot().status.is_terminal() {
            return false;
        }
        entry.cancel.cancel();
        info!(task = %id, "cancellation requested");
        true
    }

    fn entry(&self, id: &TaskId) -> Option<Arc<TaskEntry>> {
        self.inner
            .tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

fn run_task(
    id: TaskId,
    prompt: &str,
    entry: &TaskEntry,
    factory: &dyn WorkbenchFactory,
    config: &LoopConfig,
) {
    entry.mark_running();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match factory.build(&id) {
        Ok(mut workbench) => run_loop(prompt, &mut workbench, config, &entry.cancel, |step| {
            entry.mark_step(step);
        }),
        Err(err) => {
            error!(task = %id, err = %format!("{err:#}"), "failed to set up task");
            TaskResult {
                status: TaskStatus::Error,
                message: format!("Failed to set up task: {err:#}"),
                code: None,
                snapshot_path: None,
                logs: vec![
                    format!("User request: {prompt}"),
                    format!("Setup error: {err:#}"),
                ],
            }
        }
    }));
    let result = outcome.unwrap_or_else(|_| {
        error!(task = %id, "task panicked");
        TaskResult {
            status: TaskStatus::Error,
            message: INTERNAL_ERROR_MESSAGE.to_string(),
            code: None,
            snapshot_path: None,
            logs: vec![
                format!("User request: {prompt}"),
                "Internal error while running the task.".to_string(),
            ],
        }
    });
    info!(task = %id, status = %result.status, "task finished");
    entry.finish(result);
}
