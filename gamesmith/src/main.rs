use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use gamesmith::core::types::{ExecutionObservation, TaskStatus};
use gamesmith::exit_codes;
use gamesmith::io::config::{StudioConfig, load_config, write_config};
use gamesmith::io::paths::StudioPaths;
use gamesmith::io::sandbox::Sandbox;
use gamesmith::logging;
use gamesmith::registry::{TaskId, TaskRegistry, TaskSnapshot};
use gamesmith::workbench::{CodexWorkbenchFactory, process_sandbox};

/// Log lines shown when a task does not complete.
const LOG_TAIL: usize = 5;

#[derive(Parser)]
#[command(
    name = "gamesmith",
    version,
    about = "Supervisor-driven studio that writes, runs and reviews small games"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write `.gamesmith/config.toml` with default settings.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run one request through the studio loop and wait for the result.
    Run {
        /// Natural-language description of the program to build.
        prompt: String,
        /// Seconds between status polls.
        #[arg(long, default_value_t = 5)]
        poll_secs: u64,
        /// Where to write the final program on success.
        #[arg(short, long, default_value = "generated_program.py")]
        output: PathBuf,
    },
    /// Execute a program file once in the sandbox and print the observation.
    Sandbox {
        /// Program to run with the configured interpreter.
        file: PathBuf,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    let paths = StudioPaths::new(root);
    match cli.command {
        Command::Init { force } => cmd_init(&paths, force),
        Command::Run {
            prompt,
            poll_secs,
            output,
        } => cmd_run(&paths, &prompt, poll_secs, &output),
        Command::Sandbox { file } => cmd_sandbox(&paths, &file),
    }
}

fn cmd_init(paths: &StudioPaths, force: bool) -> Result<i32> {
    if !force && paths.config_path.exists() {
        println!("{} already exists", paths.config_path.display());
        return Ok(exit_codes::OK);
    }
    write_config(&paths.config_path, &StudioConfig::default())?;
    println!("wrote {}", paths.config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(paths: &StudioPaths, prompt: &str, poll_secs: u64, output: &Path) -> Result<i32> {
    if poll_secs == 0 {
        bail!("--poll-secs must be > 0");
    }
    let config = load_config(&paths.config_path)?;
    let loop_config = config.run.clone();
    let factory = CodexWorkbenchFactory::new(config, paths.clone())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    let registry = TaskRegistry::new(factory, loop_config);
    let id = {
        let _guard = runtime.enter();
        registry.submit(prompt)?
    };
    println!("task {id} submitted");
    let snapshot = runtime.block_on(poll_until_done(
        &registry,
        &id,
        Duration::from_secs(poll_secs),
    ))?;

    report(&snapshot, output)
}

async fn poll_until_done(
    registry: &TaskRegistry,
    id: &TaskId,
    interval: Duration,
) -> Result<TaskSnapshot> {
    let mut last_seen = None;
    loop {
        let snapshot = registry
            .status(id)
            .with_context(|| format!("task {id} disappeared from the registry"))?;
        if last_seen != Some((snapshot.status, snapshot.step)) {
            println!("[{}] step {}", snapshot.status, snapshot.step);
            last_seen = Some((snapshot.status, snapshot.step));
        }
        if snapshot.status.is_terminal() {
            return Ok(snapshot);
        }
        // Wakes early once the task finishes.
        let _ = tokio::time::timeout(interval, registry.wait(id)).await;
    }
}

fn report(snapshot: &TaskSnapshot, output: &Path) -> Result<i32> {
    let result = snapshot
        .result
        .as_ref()
        .with_context(|| format!("task {} finished without a result", snapshot.id))?;

    match result.status {
        TaskStatus::Completed => {
            println!("{}", result.message);
            if let Some(code) = &result.code {
                fs::write(output, code)
                    .with_context(|| format!("write {}", output.display()))?;
                println!("program written to {}", output.display());
            }
            if let Some(snapshot_path) = &result.snapshot_path {
                println!("snapshot: {}", snapshot_path.display());
            }
            Ok(exit_codes::OK)
        }
        status => {
            println!("task ended {status}: {}", result.message);
            let skip = result.logs.len().saturating_sub(LOG_TAIL);
            for line in &result.logs[skip..] {
                println!("  {line}");
            }
            Ok(match status {
                TaskStatus::Error => exit_codes::ERROR,
                _ => exit_codes::FAILED,
            })
        }
    }
}

fn cmd_sandbox(paths: &StudioPaths, file: &Path) -> Result<i32> {
    let config = load_config(&paths.config_path)?;
    let code = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let scratch = paths.task("sandbox", &config.sandbox.program_file);
    scratch.ensure()?;

    match process_sandbox(&config, scratch).run(&code) {
        ExecutionObservation::Success { snapshot } => {
            println!("success: snapshot at {}", snapshot.display());
            Ok(exit_codes::OK)
        }
        ExecutionObservation::Failure { diagnostic } => {
            println!("failure:\n{diagnostic}");
            Ok(exit_codes::FAILED)
        }
    }
}
