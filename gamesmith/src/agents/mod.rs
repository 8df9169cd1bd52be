//! Role agents: Author, CodeReviewer and InterfaceReviewer.
//!
//! Each agent owns its conversation history. The loop only sees
//! [`RoleAgent::reply`]; history is never shared across roles.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::types::Role;

pub mod conversation;

pub use conversation::ConversationAgent;

/// Input for one agent turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentInput {
    Text(String),
    TextWithImage { text: String, image: PathBuf },
}

impl AgentInput {
    pub fn text(&self) -> &str {
        match self {
            AgentInput::Text(text) | AgentInput::TextWithImage { text, .. } => text,
        }
    }

    pub fn image(&self) -> Option<&Path> {
        match self {
            AgentInput::Text(_) => None,
            AgentInput::TextWithImage { image, .. } => Some(image),
        }
    }
}

pub trait RoleAgent: Send {
    fn role(&self) -> Role;
    fn reply(&mut self, input: AgentInput) -> Result<String>;
}
