//! Oracle abstraction for the generative service behind every role.
//!
//! The [`Oracle`] trait decouples the supervisor and the role agents from the
//! actual backend (currently `codex exec`). Tests use scripted oracles that
//! return predetermined replies without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::config::OracleConfig;
use crate::io::paths::ensure_dir;
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// One oracle call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OracleRequest {
    /// Standing role instructions, placed ahead of the prompt.
    pub instructions: String,
    /// The turn-specific prompt.
    pub prompt: String,
    /// Image attached to this turn.
    pub image: Option<PathBuf>,
    /// JSON Schema the reply must satisfy.
    pub output_schema: Option<PathBuf>,
}

impl OracleRequest {
    pub fn new(instructions: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            prompt: prompt.into(),
            image: None,
            output_schema: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<PathBuf>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_output_schema(mut self, schema: impl Into<PathBuf>) -> Self {
        self.output_schema = Some(schema.into());
        self
    }

    /// Instructions and prompt as the single text the backend receives.
    pub fn full_prompt(&self) -> String {
        let instructions = self.instructions.trim();
        if instructions.is_empty() {
            return self.prompt.clone();
        }
        format!("{instructions}\n\n---\n\n{}", self.prompt)
    }
}

/// Text (or text + image) in, text out.
pub trait Oracle {
    fn complete(&self, request: &OracleRequest) -> Result<String>;
}

impl<O: Oracle + ?Sized> Oracle for Arc<O> {
    fn complete(&self, request: &OracleRequest) -> Result<String> {
        (**self).complete(request)
    }
}

/// Oracle that spawns the configured `codex exec` command.
///
/// Every call writes its last message to a fresh file under `output_dir`, so
/// clones sharing a directory never overwrite each other's replies.
#[derive(Debug, Clone)]
pub struct CodexOracle {
    config: OracleConfig,
    output_dir: PathBuf,
    calls: Arc<AtomicU64>,
}

impl CodexOracle {
    pub fn new(config: OracleConfig, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            output_dir: output_dir.into(),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_paths(&self) -> (PathBuf, PathBuf) {
        let n = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        (
            self.output_dir.join(format!("{n:04}.reply.md")),
            self.output_dir.join(format!("{n:04}.oracle.log")),
        )
    }

    fn command(&self, request: &OracleRequest, output_path: &Path) -> Result<Command> {
        let (program, leading) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("oracle.command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(leading).args(&self.config.args);
        if let Some(image) = &request.image {
            cmd.arg("--image").arg(image);
        }
        if let Some(schema) = &request.output_schema {
            if !schema.exists() {
                return Err(anyhow!("missing output schema {}", schema.display()));
            }
            cmd.arg("--output-schema").arg(schema);
        }
        cmd.arg("--output-last-message").arg(output_path).arg("-");
        Ok(cmd)
    }
}

impl Oracle for CodexOracle {
    #[instrument(skip_all, fields(timeout_secs = self.config.timeout_secs, image = request.image.is_some(), structured = request.output_schema.is_some()))]
    fn complete(&self, request: &OracleRequest) -> Result<String> {
        ensure_dir(&self.output_dir)?;
        let (output_path, log_path) = self.next_paths();
        let cmd = self.command(request, &output_path)?;
        info!(output = %output_path.display(), "starting oracle call");

        let prompt = request.full_prompt();
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.config.timeout(),
            self.config.output_limit_bytes,
        )
        .context("run oracle command")?;

        if let Err(err) = write_oracle_log(&log_path, &output) {
            warn!(err = %err, "failed to write oracle log");
        }

        if output.timed_out {
            warn!(timeout_secs = self.config.timeout_secs, "oracle timed out");
            return Err(anyhow!(
                "oracle timed out after {}s",
                self.config.timeout_secs
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "oracle failed");
            return Err(anyhow!(
                "oracle failed with status {:?}: {}",
                output.status.code(),
                output.stderr_lossy().trim()
            ));
        }
        if !output_path.exists() {
            return Err(anyhow!("missing oracle output {}", output_path.display()));
        }
        let reply = fs::read_to_string(&output_path)
            .with_context(|| format!("read oracle output {}", output_path.display()))?;
        debug!(bytes = reply.len(), "oracle call completed");
        Ok(reply)
    }
}

fn write_oracle_log(path: &Path, output: &CommandOutput) -> Result<()> {
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&output.stdout_lossy());
    buf.push_str(&output.stdout_truncated_notice("oracle"));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&output.stderr_lossy());
    buf.push_str(&output.stderr_truncated_notice("oracle"));
    if output.timed_out {
        buf.push_str("\n[oracle timed out]\n");
    }
    fs::write(path, buf).with_context(|| format!("write oracle log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_prompt_puts_instructions_first() {
        let request = OracleRequest::new("You review code.", "Here is the code");
        assert_eq!(
            request.full_prompt(),
            "You review code.\n\n---\n\nHere is the code"
        );
        let bare = OracleRequest::new("  ", "just the prompt");
        assert_eq!(bare.full_prompt(), "just the prompt");
    }

    #[test]
    fn command_includes_image_schema_and_output_flags() {
        let temp = tempfile::tempdir().expect("tempdir");
        let schema = temp.path().join("schema.json");
        fs::write(&schema, "{}").expect("write schema");
        let oracle = CodexOracle::new(OracleConfig::default(), temp.path());
        let request = OracleRequest::new("i", "p")
            .with_image("/tmp/shot.png")
            .with_output_schema(&schema);

        let cmd = oracle
            .command(&request, &temp.path().join("out.md"))
            .expect("command");
        let args: Vec<String> = cmd
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();

        assert_eq!(cmd.get_program(), "codex");
        assert_eq!(args[0], "exec");
        assert!(args.windows(2).any(|w| w == ["--image", "/tmp/shot.png"]));
        assert!(args.iter().any(|arg| arg == "--output-schema"));
        assert!(args.iter().any(|arg| arg == "--output-last-message"));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn missing_schema_is_rejected_before_spawning() {
        let temp = tempfile::tempdir().expect("tempdir");
        let oracle = CodexOracle::new(OracleConfig::default(), temp.path());
        let request = OracleRequest::new("i", "p").with_output_schema(temp.path().join("nope"));
        let err = oracle
            .command(&request, &temp.path().join("out.md"))
            .expect_err("missing schema");
        assert!(err.to_string().contains("missing output schema"));
    }

    #[test]
    fn clones_share_the_call_counter() {
        let temp = tempfile::tempdir().expect("tempdir");
        let oracle = CodexOracle::new(OracleConfig::default(), temp.path());
        let clone = oracle.clone();
        let (first, _) = oracle.next_paths();
        let (second, _) = clone.next_paths();
        assert_ne!(first, second);
    }

    #[cfg(unix)]
    #[test]
    fn reads_reply_written_by_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        // `sh -c SCRIPT sh ARGS...`: the output path follows --output-last-message.
        let script = r#"while [ "$#" -gt 0 ]; do
  if [ "$1" = "--output-last-message" ]; then out="$2"; fi
  shift
done
cat > "$out""#;
        let config = OracleConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                script.to_string(),
                "sh".to_string(),
            ],
            args: Vec::new(),
            ..OracleConfig::default()
        };
        let oracle = CodexOracle::new(config, temp.path().join("oracle"));
        let reply = oracle
            .complete(&OracleRequest::new("", "echo me"))
            .expect("complete");
        assert_eq!(reply, "echo me");
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = OracleConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo quota >&2; exit 4".to_string(),
                "sh".to_string(),
            ],
            args: Vec::new(),
            ..OracleConfig::default()
        };
        let oracle = CodexOracle::new(config, temp.path());
        let err = oracle
            .complete(&OracleRequest::new("", "hi"))
            .expect_err("failure");
        assert!(err.to_string().contains("quota"));
    }
}
