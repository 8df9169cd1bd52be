//! Oracle-backed role agent with private, append-only history.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::agents::{AgentInput, RoleAgent};
use crate::core::types::Role;
use crate::io::oracle::{Oracle, OracleRequest};
use crate::io::prompt::{PromptEngine, TurnView};

#[derive(Debug, Clone)]
struct Turn {
    input: String,
    image: Option<PathBuf>,
    reply: String,
}

/// One conversational role.
///
/// Every successful call appends `(input, reply)`; a failed oracle call
/// leaves the history untouched.
pub struct ConversationAgent<O> {
    role: Role,
    oracle: O,
    prompts: Arc<PromptEngine>,
    instructions: String,
    history: Vec<Turn>,
}

impl<O: Oracle> ConversationAgent<O> {
    pub fn new(role: Role, oracle: O, prompts: Arc<PromptEngine>, language: &str) -> Result<Self> {
        let instructions = prompts
            .role_instructions(role, language)
            .with_context(|| format!("render {role} instructions"))?;
        Ok(Self {
            role,
            oracle,
            prompts,
            instructions,
            history: Vec::new(),
        })
    }

    /// Number of completed turns.
    pub fn turns(&self) -> usize {
        self.history.len()
    }

    fn render(&self, input: &AgentInput) -> Result<String> {
        let views: Vec<TurnView<'_>> = self
            .history
            .iter()
            .map(|turn| TurnView {
                input: &turn.input,
                reply: &turn.reply,
                had_image: turn.image.is_some(),
            })
            .collect();
        self.prompts
            .conversation(&views, input.text(), input.image().is_some())
    }
}

impl<O: Oracle + Send> RoleAgent for ConversationAgent<O> {
    fn role(&self) -> Role {
        self.role
    }

    #[instrument(skip_all, fields(role = %self.role, turn = self.history.len() + 1))]
    fn reply(&mut self, input: AgentInput) -> Result<String> {
        let prompt = self
            .render(&input)
            .with_context(|| format!("render {} prompt", self.role))?;
        let mut request = OracleRequest::new(self.instructions.clone(), prompt);
        if let Some(image) = input.image() {
            request = request.with_image(image);
        }

        let reply = self
            .oracle
            .complete(&request)
            .with_context(|| format!("{} oracle call", self.role))?;
        debug!(bytes = reply.len(), "role agent replied");

        let (text, image) = match input {
            AgentInput::Text(text) => (text, None),
            AgentInput::TextWithImage { text, image } => (text, Some(image)),
        };
        self.history.push(Turn {
            input: text,
            image,
            reply: reply.clone(),
        });
        Ok(reply)
    }
}
