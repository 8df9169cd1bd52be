//! Studio configuration stored under `.gamesmith/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Studio configuration (TOML).
///
/// Missing fields default to values that reproduce the reference workflow
/// (12 steps, 1s + 2s settle windows).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct StudioConfig {
    #[serde(rename = "loop")]
    pub run: LoopConfig,
    pub supervisor: SupervisorConfig,
    pub oracle: OracleConfig,
    pub sandbox: SandboxConfig,
    pub desktop: DesktopConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopConfig {
    /// Hard ceiling on supervisor decisions per task.
    pub max_steps: u32,
    /// Fence tag the author must use for its code block.
    pub code_language: String,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_steps: 12,
            code_language: "python".to_string(),
        }
    }
}

/// Which decision engine drives the loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorMode {
    /// Ask the oracle for a structured routing decision each step.
    #[default]
    Oracle,
    /// Apply the workflow rules directly, without an oracle call.
    Rules,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SupervisorConfig {
    pub mode: SupervisorMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    /// Program and leading arguments (e.g. `["codex", "exec"]`).
    pub command: Vec<String>,
    /// Extra arguments appended before the per-call flags.
    pub args: Vec<String>,
    /// Wall-clock limit for one oracle call.
    pub timeout_secs: u64,
    /// Truncate captured oracle stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            command: vec!["codex".to_string(), "exec".to_string()],
            args: vec![
                "--skip-git-repo-check".to_string(),
                "--sandbox".to_string(),
                "read-only".to_string(),
            ],
            timeout_secs: 5 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl OracleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter command; the program path is appended.
    pub interpreter: Vec<String>,
    /// File name of the program inside the task scratch directory.
    pub program_file: String,
    /// Wait after launch for the UI to initialize.
    pub startup_settle_ms: u64,
    /// Wait after raising focus, when focus is raised.
    pub focus_settle_ms: u64,
    /// Wait after the start keys for visible state to stabilize.
    pub input_settle_ms: u64,
    /// Grace period between the terminate signal and a forced kill.
    pub terminate_grace_ms: u64,
    /// Keys pressed once to start the program; failures are ignored.
    pub start_keys: Vec<String>,
    /// Explicitly raise the child's window before sending keys.
    pub raise_focus: bool,
    /// Truncate captured program stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: vec!["python3".to_string()],
            program_file: "program.py".to_string(),
            startup_settle_ms: 1_000,
            focus_settle_ms: 1_000,
            input_settle_ms: 2_000,
            terminate_grace_ms: 2_000,
            start_keys: vec!["space".to_string(), "enter".to_string()],
            raise_focus: cfg!(target_os = "macos"),
            output_limit_bytes: 100_000,
        }
    }
}

impl SandboxConfig {
    pub fn startup_settle(&self) -> Duration {
        Duration::from_millis(self.startup_settle_ms)
    }

    pub fn focus_settle(&self) -> Duration {
        Duration::from_millis(self.focus_settle_ms)
    }

    pub fn input_settle(&self) -> Duration {
        Duration::from_millis(self.input_settle_ms)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

/// Command templates for the desktop facilities.
///
/// Placeholders: `{pid}` (focus), `{key}` (key press), `{path}` (capture).
/// Logical key names from `sandbox.start_keys` are looked up in `key_names`
/// before substitution; unmapped names pass through unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DesktopConfig {
    pub focus_command: Vec<String>,
    pub key_command: Vec<String>,
    pub capture_command: Vec<String>,
    pub key_names: BTreeMap<String, String>,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        if cfg!(target_os = "macos") {
            Self {
                focus_command: strings(&[
                    "osascript",
                    "-e",
                    "tell application \"System Events\" to set frontmost of the first process whose unix id is {pid} to true",
                ]),
                // `keystroke` would type the name letter by letter.
                key_command: strings(&[
                    "osascript",
                    "-e",
                    "tell application \"System Events\" to key code {key}",
                ]),
                capture_command: strings(&["screencapture", "-x", "{path}"]),
                key_names: key_names(&[("space", "49"), ("enter", "36")]),
            }
        } else {
            Self {
                focus_command: strings(&["xdotool", "search", "--pid", "{pid}", "windowactivate"]),
                key_command: strings(&["xdotool", "key", "{key}"]),
                capture_command: strings(&["import", "-window", "root", "{path}"]),
                // X keysyms.
                key_names: key_names(&[("space", "space"), ("enter", "Return")]),
            }
        }
    }
}

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| (*part).to_string()).collect()
}

fn key_names(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(name, key)| ((*name).to_string(), (*key).to_string()))
        .collect()
}

impl DesktopConfig {
    /// Platform key name for a logical start key.
    pub fn key_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.key_names.get(key).map_or(key, String::as_str)
    }
}

impl StudioConfig {
    pub fn validate(&self) -> Result<()> {
        if self.run.max_steps == 0 {
            return Err(anyhow!("loop.max_steps must be > 0"));
        }
        if self.run.code_language.trim().is_empty() {
            return Err(anyhow!("loop.code_language must not be empty"));
        }
        if self.oracle.timeout_secs == 0 {
            return Err(anyhow!("oracle.timeout_secs must be > 0"));
        }
        if self.oracle.output_limit_bytes == 0 {
            return Err(anyhow!("oracle.output_limit_bytes must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        if self.sandbox.program_file.trim().is_empty() {
            return Err(anyhow!("sandbox.program_file must not be empty"));
        }
        for (name, command) in [
            ("oracle.command", &self.oracle.command),
            ("sandbox.interpreter", &self.sandbox.interpreter),
            ("desktop.capture_command", &self.desktop.capture_command),
        ] {
            if command.is_empty() || command[0].trim().is_empty() {
                return Err(anyhow!("{name} must be a non-empty array"));
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `StudioConfig::default()`.
pub fn load_config(path: &Path) -> Result<StudioConfig> {
    if !path.exists() {
        let cfg = StudioConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: StudioConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &StudioConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
