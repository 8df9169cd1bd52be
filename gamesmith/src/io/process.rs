//! Helpers for running child processes with timeouts and bounded output.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn stdout_truncated_notice(&self, label: &str) -> String {
        if self.stdout_truncated > 0 {
            format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            )
        } else {
            String::new()
        }
    }

    pub fn stderr_truncated_notice(&self, label: &str) -> String {
        if self.stderr_truncated > 0 {
            format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            )
        } else {
            String::new()
        }
    }
}

type ReaderHandle = thread::JoinHandle<Result<(Vec<u8>, usize)>>;

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
    }

    let (stdout_handle, stderr_handle) = spawn_readers(&mut child, output_limit_bytes)?;

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// A long-running child whose output is drained in the background.
///
/// Dropping it force-kills the process if it is still alive, so no early
/// return can leak a running program.
#[derive(Debug)]
pub struct CapturedChild {
    child: Child,
    stdout: Option<ReaderHandle>,
    stderr: Option<ReaderHandle>,
}

impl CapturedChild {
    /// Spawn `cmd` with stdin closed and stdout/stderr captured.
    pub fn spawn(mut cmd: Command, output_limit_bytes: usize) -> Result<Self> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().context("spawn child process")?;
        let (stdout, stderr) = spawn_readers(&mut child, output_limit_bytes)?;
        debug!(pid = child.id(), "child process spawned");
        Ok(Self {
            child,
            stdout: Some(stdout),
            stderr: Some(stderr),
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Exit status if the child has already exited.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        self.child.try_wait().context("poll child process")
    }

    /// Collect captured output of a child that has exited.
    pub fn collect_output(&mut self, status: ExitStatus) -> Result<CommandOutput> {
        let stdout = self
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout already collected"))?;
        let stderr = self
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr already collected"))?;
        let (stdout, stdout_truncated) = join_output(stdout).context("join stdout")?;
        let (stderr, stderr_truncated) = join_output(stderr).context("join stderr")?;
        Ok(CommandOutput {
            status,
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            timed_out: false,
        })
    }

    /// Ask the child to exit, then kill it if it outlives `grace`.
    #[instrument(skip_all, fields(pid = self.child.id(), grace_ms = grace.as_millis() as u64))]
    pub fn terminate(&mut self, grace: Duration) -> Result<ExitStatus> {
        if let Some(status) = self.try_wait()? {
            return Ok(status);
        }
        if let Err(err) = send_terminate(self.child.id()) {
            debug!(err = %err, "terminate signal not delivered");
        }
        let status = match self
            .child
            .wait_timeout(grace)
            .context("wait for child after terminate")?
        {
            Some(status) => status,
            None => {
                warn!("child ignored terminate, killing");
                self.child.kill().context("kill child process")?;
                self.child.wait().context("wait child after kill")?
            }
        };
        // Readers finish on their own once the pipes close.
        self.stdout.take();
        self.stderr.take();
        debug!(exit_code = ?status.code(), "child process terminated");
        Ok(status)
    }
}

impl Drop for CapturedChild {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            warn!(pid = self.child.id(), "force-killing child process");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(unix)]
fn send_terminate(pid: u32) -> Result<()> {
    let status = Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .context("run kill -TERM")?;
    if !status.success() {
        return Err(anyhow!("kill -TERM exited with {:?}", status.code()));
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32) -> Result<()> {
    Err(anyhow!("graceful terminate is not supported on this platform"))
}

fn spawn_readers(child: &mut Child, limit: usize) -> Result<(ReaderHandle, ReaderHandle)> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, limit));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, limit));
    Ok((stdout_handle, stderr_handle))
}

fn join_output(handle: ReaderHandle) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_output_and_truncates() {
        let output = run_command_with_timeout(
            sh("printf 'hello world'; printf 'oops' >&2"),
            None,
            Duration::from_secs(5),
            5,
        )
        .expect("run");
        assert!(output.status.success());
        assert_eq!(output.stdout, b"hello");
        assert_eq!(output.stdout_truncated, 6);
        assert_eq!(output.stderr_lossy(), "oops");
        assert!(output.stdout_truncated_notice("oracle").contains("6 bytes"));
    }

    #[test]
    fn feeds_stdin() {
        let output = run_command_with_timeout(
            Command::new("cat"),
            Some(b"prompt text"),
            Duration::from_secs(5),
            1_000,
        )
        .expect("run");
        assert_eq!(output.stdout_lossy(), "prompt text");
    }

    #[test]
    fn kills_on_timeout() {
        let output = run_command_with_timeout(
            sh("sleep 5"),
            None,
            Duration::from_millis(100),
            1_000,
        )
        .expect("run");
        assert!(output.timed_out);
    }

    #[test]
    fn captured_child_collects_output_after_exit() {
        let mut child = CapturedChild::spawn(sh("echo out; echo err >&2; exit 3"), 1_000)
            .expect("spawn");
        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait().expect("poll") {
                break status;
            }
            assert!(started.elapsed() < Duration::from_secs(5), "child hung");
            thread::sleep(Duration::from_millis(20));
        };
        let output = child.collect_output(status).expect("collect");
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout_lossy(), "out\n");
        assert_eq!(output.stderr_lossy(), "err\n");
    }

    #[test]
    fn terminate_stops_long_running_child() {
        let mut child = CapturedChild::spawn(sh("exec sleep 30"), 1_000).expect("spawn");
        let status = child.terminate(Duration::from_secs(2)).expect("terminate");
        assert!(!status.success());
        assert!(child.try_wait().expect("poll").is_some());
    }

    #[test]
    fn terminate_kills_child_that_ignores_signal() {
        let mut child =
            CapturedChild::spawn(sh("trap '' TERM; while true; do sleep 0.1; done"), 1_000)
                .expect("spawn");
        thread::sleep(Duration::from_millis(100));
        let started = Instant::now();
        child
            .terminate(Duration::from_millis(200))
            .expect("terminate");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(child.try_wait().expect("poll").is_some());
    }
}
