//! Side-effecting adapters: configuration, processes, oracle, desktop, sandbox.

pub mod artifacts;
pub mod config;
pub mod desktop;
pub mod oracle;
pub mod paths;
pub mod process;
pub mod prompt;
pub mod sandbox;
