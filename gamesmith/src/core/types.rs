//! Shared deterministic types for the orchestration core.
//!
//! These types define stable contracts between the loop, the decision engine,
//! the role agents and the sandbox. They hold no I/O handles.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Outcome of the most recent execution of `latest_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Code has not been executed since it was last produced (or no code yet).
    #[default]
    Unknown,
    /// The program stayed alive and a snapshot was captured.
    Success,
    /// The program crashed on startup or could not be launched.
    Error,
}

/// Participant selected by the decision engine for the next step.
///
/// `Unrecognized` carries the raw value so it can be reported; it is never
/// dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Author,
    CodeReviewer,
    InterfaceReviewer,
    Execute,
    Finish,
    Unrecognized(String),
}

impl Target {
    /// Canonical spellings accepted from the oracle, in routing-schema order.
    pub const VOCABULARY: [&'static str; 5] = [
        "Author",
        "CodeReviewer",
        "InterfaceReviewer",
        "Execute",
        "Finish",
    ];

    /// Map a raw routing value onto the closed target set.
    ///
    /// Matching is case-insensitive on the canonical names; anything else
    /// becomes `Unrecognized`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match Self::VOCABULARY
            .iter()
            .position(|name| name.eq_ignore_ascii_case(trimmed))
        {
            Some(0) => Target::Author,
            Some(1) => Target::CodeReviewer,
            Some(2) => Target::InterfaceReviewer,
            Some(3) => Target::Execute,
            Some(4) => Target::Finish,
            _ => Target::Unrecognized(trimmed.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Target::Author => "Author",
            Target::CodeReviewer => "CodeReviewer",
            Target::InterfaceReviewer => "InterfaceReviewer",
            Target::Execute => "Execute",
            Target::Finish => "Finish",
            Target::Unrecognized(raw) => raw,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three conversational roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Author,
    CodeReviewer,
    InterfaceReviewer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Author => "Author",
            Role::CodeReviewer => "CodeReviewer",
            Role::InterfaceReviewer => "InterfaceReviewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One routing decision. Lives for a single loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub target: Target,
    pub instruction: String,
}

impl RoutingDecision {
    pub fn new(target: Target, instruction: impl Into<String>) -> Self {
        Self {
            target,
            instruction: instruction.into(),
        }
    }
}

/// Result of running a candidate program in the sandbox.
///
/// Execution failures are data: the sandbox never returns an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionObservation {
    Success { snapshot: PathBuf },
    Failure { diagnostic: String },
}

/// Lifecycle status of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Submitted,
    Running,
    Completed,
    Failed,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Error
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Submitted => "SUBMITTED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final outcome of one orchestration run.
///
/// Partial artifacts are always carried, whatever the status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub message: String,
    pub code: Option<String>,
    pub snapshot_path: Option<PathBuf>,
    pub logs: Vec<String>,
}

/// Feedback stored when the interface reviewer has nothing to look at.
pub const NO_IMAGE_FEEDBACK: &str = "No image available for evaluation.";

/// Whether reviewer feedback is an approval.
///
/// Surrounding whitespace, quotes, markdown emphasis and trailing punctuation
/// are ignored; the remainder must be `APPROVED` (any case).
pub fn is_approval(feedback: &str) -> bool {
    let mut current = feedback;
    // Decoration can nest in any order (`**APPROVED**.`, `"Approved."`).
    loop {
        let trimmed = current
            .trim()
            .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*' | '_'))
            .trim_end_matches(|c: char| matches!(c, '.' | '!'));
        if trimmed.len() == current.len() {
            break;
        }
        current = trimmed;
    }
    current.eq_ignore_ascii_case("approved")
}
