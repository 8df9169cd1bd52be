//! Wires the production collaborators for one task from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::agents::{ConversationAgent, RoleAgent};
use crate::core::types::Role;
use crate::io::config::{StudioConfig, SupervisorMode};
use crate::io::desktop::CommandDesktop;
use crate::io::oracle::CodexOracle;
use crate::io::paths::{StudioPaths, TaskPaths};
use crate::io::prompt::PromptEngine;
use crate::io::sandbox::ProcessSandbox;
use crate::registry::{TaskId, WorkbenchFactory};
use crate::step::Workbench;
use crate::supervisor::{DecisionEngine, OracleDecisionEngine, RulesDecisionEngine};

/// Builds `codex exec`-backed workbenches with per-task scratch directories.
pub struct CodexWorkbenchFactory {
    config: StudioConfig,
    paths: StudioPaths,
    prompts: Arc<PromptEngine>,
}

impl CodexWorkbenchFactory {
    pub fn new(config: StudioConfig, paths: StudioPaths) -> Result<Self> {
        config.validate()?;
        let prompts = Arc::new(PromptEngine::new().context("load prompt templates")?);
        Ok(Self {
            config,
            paths,
            prompts,
        })
    }

    pub fn task_paths(&self, id: &TaskId) -> TaskPaths {
        self.paths
            .task(&id.to_string(), &self.config.sandbox.program_file)
    }

    fn agent(&self, role: Role, oracle: &CodexOracle) -> Result<Box<dyn RoleAgent>> {
        let agent = ConversationAgent::new(
            role,
            oracle.clone(),
            Arc::clone(&self.prompts),
            &self.config.run.code_language,
        )?;
        Ok(Box::new(agent))
    }
}

/// Sandbox for `paths` using the configured interpreter and desktop commands.
pub fn process_sandbox(
    config: &StudioConfig,
    paths: TaskPaths,
) -> ProcessSandbox<CommandDesktop> {
    ProcessSandbox::new(
        config.sandbox.clone(),
        paths,
        CommandDesktop::new(config.desktop.clone()),
    )
}

impl WorkbenchFactory for CodexWorkbenchFactory {
    fn build(&self, id: &TaskId) -> Result<Workbench> {
        let paths = self.task_paths(id);
        paths.ensure()?;
        debug!(task = %id, dir = %paths.dir.display(), "building workbench");

        let oracle = CodexOracle::new(self.config.oracle.clone(), paths.oracle_dir.clone());
        let engine: Box<dyn DecisionEngine> = match self.config.supervisor.mode {
            SupervisorMode::Oracle => Box::new(OracleDecisionEngine::new(
                oracle.clone(),
                Arc::clone(&self.prompts),
                paths.routing_schema_path.clone(),
            )),
            SupervisorMode::Rules => Box::new(RulesDecisionEngine),
        };

        Ok(Workbench {
            engine,
            author: self.agent(Role::Author, &oracle)?,
            code_reviewer: self.agent(Role::CodeReviewer, &oracle)?,
            interface_reviewer: self.agent(Role::InterfaceReviewer, &oracle)?,
            sandbox: Box::new(process_sandbox(&self.config, paths.clone())),
            prompts: Arc::clone(&self.prompts),
            artifacts: Some(paths),
        })
    }
}
