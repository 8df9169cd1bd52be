//! Multi-role game studio driven by a supervisor loop.
//!
//! A task starts from a natural-language request. Each step a supervisor
//! picks the next role (author, code reviewer, interface reviewer, execute
//! or finish) and the loop folds the outcome into the project state until
//! the product is approved, a step fails fatally or the step ceiling hits.
//!
//! - **[`core`]**: Pure, deterministic logic (state, routing, policy,
//!   code extraction). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (config, processes, the oracle,
//!   desktop commands, the execution sandbox, artifacts).
//!
//! Orchestration modules ([`step`], [`looping`], [`registry`]) coordinate
//! core logic with I/O; [`workbench`] wires the production collaborators.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod registry;
pub mod step;
pub mod supervisor;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workbench;
