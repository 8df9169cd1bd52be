//! Mutable project record threaded through the orchestration loop.
//!
//! Feedback is stamped with the code revision it was captured against and is
//! only visible while that revision is current. Every code or execution change
//! also clears both feedback slots, so a stale approval can never be read back.

use std::path::{Path, PathBuf};

use crate::core::types::{ExecutionObservation, ExecutionStatus, is_approval};

/// Context recorded after a successful execution.
pub const EXECUTION_SUCCESS_CONTEXT: &str = "Code execution successful, snapshot captured.";

/// Which reviewer produced a piece of feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reviewer {
    Code,
    Interface,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Review {
    revision: u32,
    text: String,
}

/// Read-only view handed to decision engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateView<'a> {
    pub request: &'a str,
    pub context: &'a str,
    pub has_code: bool,
    pub execution_status: ExecutionStatus,
    pub reviewer_feedback: Option<&'a str>,
    pub designer_feedback: Option<&'a str>,
}

impl StateView<'_> {
    pub fn reviewer_approved(&self) -> bool {
        self.reviewer_feedback.is_some_and(is_approval)
    }

    pub fn designer_approved(&self) -> bool {
        self.designer_feedback.is_some_and(is_approval)
    }
}

/// Project state owned by exactly one loop instance.
#[derive(Debug, Clone)]
pub struct ProjectState {
    request: String,
    context: String,
    latest_code: Option<String>,
    revision: u32,
    execution_status: ExecutionStatus,
    latest_snapshot: Option<PathBuf>,
    reviewer_feedback: Option<Review>,
    designer_feedback: Option<Review>,
}

impl ProjectState {
    pub fn new(request: impl Into<String>) -> Self {
        let request = request.into();
        Self {
            context: request.clone(),
            request,
            latest_code: None,
            revision: 0,
            execution_status: ExecutionStatus::Unknown,
            latest_snapshot: None,
            reviewer_feedback: None,
            designer_feedback: None,
        }
    }

    pub fn request(&self) -> &str {
        &self.request
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn latest_code(&self) -> Option<&str> {
        self.latest_code.as_deref()
    }

    /// Number of times code has been replaced.
    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn execution_status(&self) -> ExecutionStatus {
        self.execution_status
    }

    pub fn latest_snapshot(&self) -> Option<&Path> {
        self.latest_snapshot.as_deref()
    }

    pub fn reviewer_feedback(&self) -> Option<&str> {
        self.current_review(self.reviewer_feedback.as_ref())
    }

    pub fn designer_feedback(&self) -> Option<&str> {
        self.current_review(self.designer_feedback.as_ref())
    }

    pub fn view(&self) -> StateView<'_> {
        StateView {
            request: &self.request,
            context: &self.context,
            has_code: self.latest_code.is_some(),
            execution_status: self.execution_status,
            reviewer_feedback: self.reviewer_feedback(),
            designer_feedback: self.designer_feedback(),
        }
    }

    /// Replace the code wholesale after a well-formed author turn.
    ///
    /// Forces re-execution: status goes back to `Unknown`, the snapshot is
    /// dropped and both feedback slots are cleared.
    pub fn record_code(&mut self, code: impl Into<String>) {
        self.latest_code = Some(code.into());
        self.revision += 1;
        self.execution_status = ExecutionStatus::Unknown;
        self.latest_snapshot = None;
        self.clear_feedback();
    }

    /// Apply a sandbox observation. Both feedback slots are cleared either way.
    pub fn record_execution(&mut self, observation: ExecutionObservation) {
        match observation {
            ExecutionObservation::Success { snapshot } => {
                self.execution_status = ExecutionStatus::Success;
                self.latest_snapshot = Some(snapshot);
                self.context = EXECUTION_SUCCESS_CONTEXT.to_string();
            }
            ExecutionObservation::Failure { diagnostic } => {
                self.execution_status = ExecutionStatus::Error;
                self.context = diagnostic;
            }
        }
        self.clear_feedback();
    }

    pub fn record_review(&mut self, reviewer: Reviewer, text: impl Into<String>) {
        let review = Some(Review {
            revision: self.revision,
            text: text.into(),
        });
        match reviewer {
            Reviewer::Code => self.reviewer_feedback = review,
            Reviewer::Interface => self.designer_feedback = review,
        }
    }

    pub fn note_context(&mut self, context: impl Into<String>) {
        self.context = context.into();
    }

    /// Consume the state, yielding the artifacts a task result carries.
    pub fn into_artifacts(self) -> (Option<String>, Option<PathBuf>) {
        (self.latest_code, self.latest_snapshot)
    }

    fn clear_feedback(&mut self) {
        self.reviewer_feedback = None;
        self.designer_feedback = None;
    }

    fn current_review<'a>(&self, review: Option<&'a Review>) -> Option<&'a str> {
        review
            .filter(|review| review.revision == self.revision)
            .map(|review| review.text.as_str())
    }
}
