//! The single parse point between free-form oracle output and control flow.

use jsonschema::Draft;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::types::{RoutingDecision, Target};

/// JSON Schema the decision oracle must honor.
pub const ROUTING_SCHEMA: &str = include_str!("../../schemas/routing_decision.schema.json");

/// Oracle/control failures. Fatal to the task that hits them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    #[error("decision oracle call failed: {0}")]
    Oracle(String),
    #[error("malformed routing decision: {0}")]
    Malformed(String),
    #[error("invalid routing target '{0}'")]
    InvalidTarget(String),
    #[error("supervisor requested {target} before {requirement}")]
    PolicyViolation {
        target: String,
        requirement: &'static str,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDecision {
    next_agent: String,
    instruction: String,
}

/// Parse an oracle reply into a validated routing decision.
///
/// Order: JSON parse, vocabulary check (so an out-of-set target is reported
/// as such), then schema conformance of the whole object.
pub fn parse_decision(raw: &str) -> Result<RoutingDecision, SupervisorError> {
    let body = strip_json_fence(raw);
    let mut value: Value = serde_json::from_str(body)
        .map_err(|err| SupervisorError::Malformed(format!("reply is not JSON: {err}")))?;

    if let Some(next) = value.get("next_agent").and_then(Value::as_str) {
        match Target::parse(next) {
            Target::Unrecognized(raw) => return Err(SupervisorError::InvalidTarget(raw)),
            target => value["next_agent"] = Value::String(target.as_str().to_string()),
        }
    }

    validate_schema(&value)?;
    let decision: RawDecision = serde_json::from_value(value)
        .map_err(|err| SupervisorError::Malformed(err.to_string()))?;
    Ok(RoutingDecision::new(
        Target::parse(&decision.next_agent),
        decision.instruction,
    ))
}

/// Validate a decision object against [`ROUTING_SCHEMA`] (Draft 2020-12).
fn validate_schema(instance: &Value) -> Result<(), SupervisorError> {
    let schema: Value = serde_json::from_str(ROUTING_SCHEMA)
        .map_err(|err| SupervisorError::Malformed(format!("routing schema: {err}")))?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| SupervisorError::Malformed(format!("routing schema: {err}")))?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(SupervisorError::Malformed(messages.join("; ")));
    }
    Ok(())
}

/// Drop a surrounding markdown fence (```json ... ```) if the oracle added one.
fn strip_json_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(rest) = rest.strip_suffix("```") else {
        return trimmed;
    };
    match rest.split_once('\n') {
        Some((_tag, body)) => body.trim(),
        None => rest.trim(),
    }
}
