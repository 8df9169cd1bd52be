//! Decision engines: pick the next participant from the project state.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::core::policy::{default_instruction, expected_next};
use crate::core::routing::{ROUTING_SCHEMA, SupervisorError, parse_decision};
use crate::core::state::StateView;
use crate::core::types::RoutingDecision;
use crate::io::oracle::{Oracle, OracleRequest};
use crate::io::prompt::PromptEngine;

pub trait DecisionEngine: Send {
    fn decide(&self, view: &StateView<'_>) -> Result<RoutingDecision, SupervisorError>;
}

/// Asks the oracle for a structured routing decision.
///
/// The reply goes through [`parse_decision`]; nothing is defaulted. A choice
/// that differs from the workflow policy is logged but honored.
pub struct OracleDecisionEngine<O> {
    oracle: O,
    prompts: Arc<PromptEngine>,
    schema_path: PathBuf,
}

impl<O: Oracle> OracleDecisionEngine<O> {
    pub fn new(oracle: O, prompts: Arc<PromptEngine>, schema_path: impl Into<PathBuf>) -> Self {
        Self {
            oracle,
            prompts,
            schema_path: schema_path.into(),
        }
    }

    fn write_schema(&self) -> Result<(), SupervisorError> {
        if let Some(parent) = self.schema_path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                SupervisorError::Oracle(format!("create schema dir {}: {err}", parent.display()))
            })?;
        }
        fs::write(&self.schema_path, ROUTING_SCHEMA).map_err(|err| {
            SupervisorError::Oracle(format!(
                "write schema {}: {err}",
                self.schema_path.display()
            ))
        })
    }

    fn request(&self, view: &StateView<'_>) -> Result<OracleRequest, SupervisorError> {
        let render_err = |err: anyhow::Error| SupervisorError::Oracle(format!("{err:#}"));
        let instructions = self.prompts.supervisor_instructions().map_err(render_err)?;
        let report = self.prompts.status_report(view).map_err(render_err)?;
        Ok(OracleRequest::new(instructions, report).with_output_schema(&self.schema_path))
    }
}

impl<O: Oracle + Send> DecisionEngine for OracleDecisionEngine<O> {
    #[instrument(skip_all, fields(has_code = view.has_code, status = ?view.execution_status))]
    fn decide(&self, view: &StateView<'_>) -> Result<RoutingDecision, SupervisorError> {
        self.write_schema()?;
        let request = self.request(view)?;
        let raw = self
            .oracle
            .complete(&request)
            .map_err(|err| SupervisorError::Oracle(format!("{err:#}")))?;
        let decision = parse_decision(&raw)?;

        let expected = expected_next(view);
        if decision.target != expected {
            warn!(
                chosen = %decision.target,
                expected = %expected,
                "supervisor diverged from workflow policy"
            );
        } else {
            debug!(next = %decision.target, "supervisor decision");
        }
        Ok(decision)
    }
}

/// Applies the workflow policy directly, with no oracle call.
#[derive(Debug, Clone, Copy, Default)]
pub struct RulesDecisionEngine;

impl DecisionEngine for RulesDecisionEngine {
    fn decide(&self, view: &StateView<'_>) -> Result<RoutingDecision, SupervisorError> {
        let target = expected_next(view);
        let instruction = default_instruction(&target, view);
        Ok(RoutingDecision::new(target, instruction))
    }
}
