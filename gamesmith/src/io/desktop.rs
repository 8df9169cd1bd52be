//! Desktop facilities consumed by the sandbox: window focus, synthetic key
//! presses and whole-screen capture.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::io::config::DesktopConfig;
use crate::io::process::run_command_with_timeout;

const DESKTOP_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
const DESKTOP_OUTPUT_LIMIT: usize = 16 * 1024;

pub trait Desktop {
    /// Bring the windows of process `pid` to the front.
    fn raise_focus(&self, pid: u32) -> Result<()>;
    /// Press and release one key. Callers treat failures as best-effort.
    fn press_key(&self, key: &str) -> Result<()>;
    /// Capture the whole screen into `path`.
    fn capture_screen(&self, path: &Path) -> Result<()>;
}

/// Desktop backed by external commands (`xdotool`, `import`, `osascript`, ...).
#[derive(Debug, Clone)]
pub struct CommandDesktop {
    config: DesktopConfig,
}

impl CommandDesktop {
    pub fn new(config: DesktopConfig) -> Self {
        Self { config }
    }
}

impl Desktop for CommandDesktop {
    fn raise_focus(&self, pid: u32) -> Result<()> {
        run_template("focus", &self.config.focus_command, "{pid}", &pid.to_string())
    }

    fn press_key(&self, key: &str) -> Result<()> {
        run_template("key", &self.config.key_command, "{key}", self.config.key_name(key))
    }

    fn capture_screen(&self, path: &Path) -> Result<()> {
        let target = path.to_string_lossy();
        run_template("capture", &self.config.capture_command, "{path}", &target)?;
        if !path.exists() {
            return Err(anyhow!(
                "capture command produced no file at {}",
                path.display()
            ));
        }
        Ok(())
    }
}

/// Substitute `placeholder` in every template argument.
fn expand(template: &[String], placeholder: &str, value: &str) -> Result<Command> {
    let (program, args) = template
        .split_first()
        .ok_or_else(|| anyhow!("desktop command is empty"))?;
    let mut cmd = Command::new(program.replace(placeholder, value));
    cmd.args(args.iter().map(|arg| arg.replace(placeholder, value)));
    Ok(cmd)
}

fn run_template(label: &str, template: &[String], placeholder: &str, value: &str) -> Result<()> {
    let cmd = expand(template, placeholder, value)?;
    debug!(label, value, "running desktop command");
    let output = run_command_with_timeout(cmd, None, DESKTOP_COMMAND_TIMEOUT, DESKTOP_OUTPUT_LIMIT)
        .with_context(|| format!("run {label} command"))?;
    if output.timed_out {
        return Err(anyhow!("{label} command timed out"));
    }
    if !output.status.success() {
        return Err(anyhow!(
            "{label} command failed with status {:?}: {}",
            output.status.code(),
            output.stderr_lossy().trim()
        ));
    }
    Ok(())
}
