//! Execution sandbox: run a candidate program, poke it, and photograph it.
//!
//! Sequence per run: write program, spawn, startup settle, optional focus
//! raise, start keys, input settle, liveness check, capture, terminate.
//! Every failure comes back as [`ExecutionObservation::Failure`].

use std::fs;
use std::process::Command;
use std::thread;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::types::ExecutionObservation;
use crate::io::config::SandboxConfig;
use crate::io::desktop::Desktop;
use crate::io::paths::{TaskPaths, ensure_dir};
use crate::io::process::{CapturedChild, CommandOutput};

pub trait Sandbox {
    /// Run `code` once. Never fails; problems become `Failure` observations.
    fn run(&self, code: &str) -> ExecutionObservation;
}

/// Sandbox that launches the configured interpreter as a child process.
#[derive(Debug, Clone)]
pub struct ProcessSandbox<D> {
    config: SandboxConfig,
    paths: TaskPaths,
    desktop: D,
}

impl<D: Desktop> ProcessSandbox<D> {
    pub fn new(config: SandboxConfig, paths: TaskPaths, desktop: D) -> Self {
        Self {
            config,
            paths,
            desktop,
        }
    }

    fn interpreter_command(&self) -> Result<Command> {
        let (program, args) = self
            .config
            .interpreter
            .split_first()
            .ok_or_else(|| anyhow!("sandbox.interpreter is empty"))?;
        let mut cmd = Command::new(program);
        // Relative to the task directory, which is also the working directory.
        cmd.args(args)
            .arg(&self.config.program_file)
            .current_dir(&self.paths.dir);
        Ok(cmd)
    }

    fn try_run(&self, code: &str) -> Result<ExecutionObservation> {
        ensure_dir(&self.paths.dir)?;
        fs::write(&self.paths.program_path, code)
            .with_context(|| format!("write program {}", self.paths.program_path.display()))?;

        let mut child =
            CapturedChild::spawn(self.interpreter_command()?, self.config.output_limit_bytes)
                .context("launch program")?;
        info!(pid = child.id(), "program launched");

        thread::sleep(self.config.startup_settle());

        if self.config.raise_focus {
            match self.desktop.raise_focus(child.id()) {
                Ok(()) => thread::sleep(self.config.focus_settle()),
                Err(err) => warn!(err = %err, "failed to raise program window"),
            }
        }

        for key in &self.config.start_keys {
            if let Err(err) = self.desktop.press_key(key) {
                debug!(key = %key, err = %err, "start key ignored");
            }
        }

        thread::sleep(self.config.input_settle());

        if let Some(status) = child.try_wait()? {
            let output = child.collect_output(status)?;
            info!(exit_code = ?status.code(), "program exited during settle");
            return Ok(ExecutionObservation::Failure {
                diagnostic: crash_diagnostic(&output),
            });
        }

        let snapshot = self.paths.snapshot_path.clone();
        if snapshot.exists() {
            fs::remove_file(&snapshot)
                .with_context(|| format!("remove stale snapshot {}", snapshot.display()))?;
        }
        self.desktop
            .capture_screen(&snapshot)
            .context("capture screen")?;
        debug!(path = %snapshot.display(), "snapshot captured");

        child.terminate(self.config.terminate_grace())?;
        Ok(ExecutionObservation::Success { snapshot })
    }
}

impl<D: Desktop> Sandbox for ProcessSandbox<D> {
    #[instrument(skip_all, fields(program = %self.paths.program_path.display()))]
    fn run(&self, code: &str) -> ExecutionObservation {
        match self.try_run(code) {
            Ok(observation) => observation,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "sandbox run failed");
                ExecutionObservation::Failure {
                    diagnostic: format!("System error trying to run code: {err:#}"),
                }
            }
        }
    }
}

fn crash_diagnostic(output: &CommandOutput) -> String {
    let code = match output.status.code() {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    };
    format!(
        "Program crashed immediately on startup ({code}):\nStdout: {}{}\nStderr: {}{}",
        output.stdout_lossy().trim_end(),
        output.stdout_truncated_notice("program"),
        output.stderr_lossy().trim_end(),
        output.stderr_truncated_notice("program"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    struct NoDesktop;

    impl Desktop for NoDesktop {
        fn raise_focus(&self, _pid: u32) -> Result<()> {
            Err(anyhow!("no display"))
        }

        fn press_key(&self, _key: &str) -> Result<()> {
            Err(anyhow!("no display"))
        }

        fn capture_screen(&self, _path: &Path) -> Result<()> {
            Err(anyhow!("no display"))
        }
    }

    #[test]
    fn missing_interpreter_becomes_system_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = SandboxConfig {
            interpreter: vec!["gamesmith-no-such-interpreter".to_string()],
            startup_settle_ms: 0,
            ..SandboxConfig::default()
        };
        let sandbox =
            ProcessSandbox::new(config, TaskPaths::new(temp.path(), "program.py"), NoDesktop);

        let observation = sandbox.run("print('hi')");
        match observation {
            ExecutionObservation::Failure { diagnostic } => {
                assert!(diagnostic.starts_with("System error trying to run code:"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(temp.path().join("program.py").exists());
    }
}
