//! The fixed supervisor workflow, expressed as a deterministic function.
//!
//! Rules, in priority order:
//! 1. no code yet -> Author
//! 2. code not executed since it changed -> Execute
//! 3. execution failed -> Author
//! 4. execution succeeded -> CodeReviewer, then InterfaceReviewer
//! 5. both approved -> Finish
//! 6. any critique -> Author

use crate::core::routing::SupervisorError;
use crate::core::state::StateView;
use crate::core::types::{ExecutionStatus, Target};

/// Target the workflow prescribes for the given state.
pub fn expected_next(view: &StateView<'_>) -> Target {
    if !view.has_code {
        return Target::Author;
    }
    match view.execution_status {
        ExecutionStatus::Unknown => Target::Execute,
        ExecutionStatus::Error => Target::Author,
        ExecutionStatus::Success => match (view.reviewer_feedback, view.designer_feedback) {
            (None, _) => Target::CodeReviewer,
            (Some(_), None) => Target::InterfaceReviewer,
            (Some(_), Some(_)) if view.reviewer_approved() && view.designer_approved() => {
                Target::Finish
            }
            (Some(_), Some(_)) => Target::Author,
        },
    }
}

/// Check that a `Finish` decision is backed by an executed, approved program.
pub fn finish_allowed(view: &StateView<'_>) -> Result<(), SupervisorError> {
    let requirement = if !view.has_code {
        Some("any code was written")
    } else if view.execution_status != ExecutionStatus::Success {
        Some("the latest code executed successfully")
    } else if !view.reviewer_approved() {
        Some("the code reviewer approved")
    } else if !view.designer_approved() {
        Some("the interface reviewer approved")
    } else {
        None
    };
    match requirement {
        Some(requirement) => Err(SupervisorError::PolicyViolation {
            target: Target::Finish.to_string(),
            requirement,
        }),
        None => Ok(()),
    }
}

/// Instruction text used when the policy routes without an oracle.
pub fn default_instruction(target: &Target, view: &StateView<'_>) -> String {
    match target {
        Target::Author if !view.has_code => {
            format!("Write a complete program for this request: {}", view.request)
        }
        Target::Author if view.execution_status == ExecutionStatus::Error => {
            "The program failed to run. Fix the error and return the full program.".to_string()
        }
        Target::Author => {
            "Address the reviewer feedback and return the full revised program.".to_string()
        }
        Target::Execute => "Run the latest code and capture a snapshot.".to_string(),
        Target::CodeReviewer => {
            "Review the code for logic errors, crashes and security issues.".to_string()
        }
        Target::InterfaceReviewer => {
            "Evaluate the snapshot of the running program for clarity and visual quality."
                .to_string()
        }
        Target::Finish => "Both reviewers approved the executed program.".to_string(),
        Target::Unrecognized(_) => String::new(),
    }
}
