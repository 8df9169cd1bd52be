//! Prompt rendering for the supervisor and the role agents.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::state::StateView;
use crate::core::types::{ExecutionStatus, Role, is_approval};

const SUPERVISOR_TEMPLATE: &str = include_str!("prompts/supervisor.md");
const STATUS_TEMPLATE: &str = include_str!("prompts/status.md");
const AUTHOR_TEMPLATE: &str = include_str!("prompts/author.md");
const CODE_REVIEWER_TEMPLATE: &str = include_str!("prompts/code_reviewer.md");
const INTERFACE_REVIEWER_TEMPLATE: &str = include_str!("prompts/interface_reviewer.md");
const AUTHOR_TURN_TEMPLATE: &str = include_str!("prompts/author_turn.md");
const CODE_REVIEW_TURN_TEMPLATE: &str = include_str!("prompts/code_review_turn.md");
const CONVERSATION_TEMPLATE: &str = include_str!("prompts/conversation.md");

/// One past exchange, as shown back to a role agent.
#[derive(Debug, Clone, Serialize)]
pub struct TurnView<'a> {
    pub input: &'a str,
    pub reply: &'a str,
    pub had_image: bool,
}

/// Inputs for an author turn. Approved feedback is left out of the prompt.
#[derive(Debug, Clone, Copy)]
pub struct AuthorTurn<'a> {
    pub instruction: &'a str,
    pub runtime_error: Option<&'a str>,
    pub reviewer_feedback: Option<&'a str>,
    pub designer_feedback: Option<&'a str>,
}

/// Template engine wrapper around minijinja.
#[derive(Debug)]
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("supervisor", SUPERVISOR_TEMPLATE)?;
        env.add_template("status", STATUS_TEMPLATE)?;
        env.add_template("author", AUTHOR_TEMPLATE)?;
        env.add_template("code_reviewer", CODE_REVIEWER_TEMPLATE)?;
        env.add_template("interface_reviewer", INTERFACE_REVIEWER_TEMPLATE)?;
        env.add_template("author_turn", AUTHOR_TURN_TEMPLATE)?;
        env.add_template("code_review_turn", CODE_REVIEW_TURN_TEMPLATE)?;
        env.add_template("conversation", CONVERSATION_TEMPLATE)?;
        Ok(Self { env })
    }

    /// Standing instructions that encode the routing workflow.
    pub fn supervisor_instructions(&self) -> Result<String> {
        let template = self.env.get_template("supervisor")?;
        Ok(template.render(context! {})?.trim().to_string())
    }

    /// Natural-language situation report for one routing decision.
    pub fn status_report(&self, view: &StateView<'_>) -> Result<String> {
        let status = match view.execution_status {
            ExecutionStatus::Unknown => "unknown",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
        };
        let template = self.env.get_template("status")?;
        let rendered = template.render(context! {
            request => view.request.trim(),
            context => view.context.trim(),
            has_code => view.has_code,
            execution_status => status,
            reviewer_feedback => non_empty(view.reviewer_feedback),
            designer_feedback => non_empty(view.designer_feedback),
        })?;
        Ok(rendered.trim().to_string())
    }

    pub fn role_instructions(&self, role: Role, language: &str) -> Result<String> {
        let name = match role {
            Role::Author => "author",
            Role::CodeReviewer => "code_reviewer",
            Role::InterfaceReviewer => "interface_reviewer",
        };
        let template = self.env.get_template(name)?;
        Ok(template
            .render(context! { language => language })?
            .trim()
            .to_string())
    }

    pub fn author_turn(&self, turn: &AuthorTurn<'_>) -> Result<String> {
        let template = self.env.get_template("author_turn")?;
        let rendered = template.render(context! {
            instruction => turn.instruction.trim(),
            runtime_error => non_empty(turn.runtime_error),
            reviewer_feedback => pending(turn.reviewer_feedback),
            designer_feedback => pending(turn.designer_feedback),
        })?;
        Ok(rendered.trim().to_string())
    }

    pub fn code_review_turn(&self, instruction: &str, code: &str, language: &str) -> Result<String> {
        let template = self.env.get_template("code_review_turn")?;
        let rendered = template.render(context! {
            instruction => instruction.trim(),
            code => code,
            language => language,
        })?;
        Ok(rendered.trim().to_string())
    }

    /// Full history plus the new input, as one prompt.
    pub fn conversation(
        &self,
        history: &[TurnView<'_>],
        input: &str,
        has_image: bool,
    ) -> Result<String> {
        let template = self.env.get_template("conversation")?;
        let rendered = template.render(context! {
            history => history,
            input => input.trim(),
            has_image => has_image,
        })?;
        Ok(rendered.trim().to_string())
    }
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|text| !text.is_empty())
}

fn pending(feedback: Option<&str>) -> Option<&str> {
    non_empty(feedback).filter(|text| !is_approval(text))
}
