//! Execution boundary
//!
//! The only place a side-effecting action actually runs. Every call carries
//! a timeout; nothing here retries.
//!
//! # Security Features
//! - execve-style execution (no shell)
//! - Shell interpreter invocation rejected (sh, bash, zsh, fish, ...)
//! - Shell metacharacters in any argument rejected
//! - stdin set to null, stdout/stderr piped
//! - Child process killed when its timeout expires

use async_trait::async_trait;
use sdk::errors::{ErrorReport, StewardError};
use sdk::types::ToolOutput;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

pub mod sandbox;

pub use sandbox::Sandbox;

/// Upper bound on captured stdout/stderr, in bytes
const MAX_CAPTURE_BYTES: usize = 64 * 1024;

const SHELLS: &[&str] = &["sh", "bash", "zsh", "fish", "dash", "ksh", "csh", "tcsh"];

/// Body of an in-process tool call
pub type NativeCall = Box<dyn FnOnce() -> Result<ToolOutput, StewardError> + Send + 'static>;

/// What to run
pub enum Invocation {
    /// An external program, argv-style
    Command {
        argv: Vec<String>,
        cwd: Option<PathBuf>,
    },
    /// An in-process call (resource gauges, filesystem queries)
    Native { label: String, call: NativeCall },
}

impl Invocation {
    pub fn command<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::Command {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
        }
    }

    pub fn native<F>(label: impl Into<String>, call: F) -> Self
    where
        F: FnOnce() -> Result<ToolOutput, StewardError> + Send + 'static,
    {
        Invocation::Native {
            label: label.into(),
            call: Box::new(call),
        }
    }

    /// Set the working directory of a command; no effect on native calls
    pub fn in_dir(self, dir: impl Into<PathBuf>) -> Self {
        match self {
            Invocation::Command { argv, .. } => Invocation::Command {
                argv,
                cwd: Some(dir.into()),
            },
            native => native,
        }
    }

    /// Command line as one string, `None` for native calls
    pub fn command_line(&self) -> Option<String> {
        match self {
            Invocation::Command { argv, .. } => Some(argv.join(" ")),
            Invocation::Native { .. } => None,
        }
    }

    /// Human-readable label for logs and audit
    pub fn describe(&self) -> String {
        match self {
            Invocation::Command { argv, .. } => argv.join(" "),
            Invocation::Native { label, .. } => label.clone(),
        }
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Invocation::Command { argv, cwd } => f
                .debug_struct("Command")
                .field("argv", argv)
                .field("cwd", cwd)
                .finish(),
            Invocation::Native { label, .. } => {
                f.debug_struct("Native").field("label", label).finish()
            }
        }
    }
}

/// Result of one boundary call
#[derive(Debug, Clone, Serialize)]
pub struct ExecOutcome {
    pub success: bool,
    pub output: String,
    pub data: serde_json::Value,
    pub duration: Duration,
    pub timed_out: bool,
    pub error: Option<ErrorReport>,
}

impl ExecOutcome {
    pub fn ok(output: ToolOutput, duration: Duration) -> Self {
        Self {
            success: true,
            output: output.text,
            data: output.data,
            duration,
            timed_out: false,
            error: None,
        }
    }

    pub fn failed(error: &StewardError, output: String, duration: Duration) -> Self {
        Self {
            success: false,
            output,
            data: serde_json::Value::Null,
            duration,
            timed_out: matches!(error, StewardError::CommandTimeout(_)),
            error: Some(ErrorReport::from(error)),
        }
    }
}

/// Timeout-bounded executor of side-effecting actions
#[async_trait]
pub trait ExecutionBoundary: Send + Sync {
    async fn run(&self, invocation: Invocation, timeout: Duration) -> ExecOutcome;
}

/// Runs commands as child processes and native calls on the blocking pool
#[derive(Debug, Clone, Default)]
pub struct ProcessBoundary;

impl ProcessBoundary {
    pub fn new() -> Self {
        Self
    }

    /// Validate an argv without executing it
    ///
    /// # Security Gates
    /// 1. Non-empty program
    /// 2. Reject shell interpreters
    /// 3. Reject shell metacharacters in any argument
    pub fn validate(argv: &[String]) -> Result<(), StewardError> {
        let program = argv
            .first()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| StewardError::CommandRejected("empty command".to_string()))?;

        let base = program.rsplit('/').next().unwrap_or(program);
        if SHELLS.contains(&base) {
            return Err(StewardError::CommandRejected(format!(
                "shell invocation not allowed: {}",
                program
            )));
        }

        if let Some(arg) = argv.iter().find(|a| has_shell_metacharacters(a)) {
            return Err(StewardError::CommandRejected(format!(
                "shell metacharacters in argument: {}",
                arg
            )));
        }

        Ok(())
    }

    async fn run_command(
        argv: Vec<String>,
        cwd: Option<PathBuf>,
        timeout: Duration,
    ) -> Result<ToolOutput, StewardError> {
        Self::validate(&argv)?;

        let mut command = tokio::process::Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StewardError::CommandNotFound(argv[0].clone())
            } else {
                StewardError::Io(e)
            }
        })?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| StewardError::CommandTimeout(timeout.as_secs()))??;

        let stdout = clip(String::from_utf8_lossy(&output.stdout).into_owned());
        if output.status.success() {
            Ok(ToolOutput::text(stdout.trim_end()))
        } else {
            let stderr = clip(String::from_utf8_lossy(&output.stderr).into_owned());
            Err(StewardError::CommandFailed {
                status: output.status.code().unwrap_or(-1),
                stderr: stderr.trim_end().to_string(),
            })
        }
    }

    async fn run_native(call: NativeCall, timeout: Duration) -> Result<ToolOutput, StewardError> {
        let handle = tokio::task::spawn_blocking(call);
        match tokio::time::timeout(timeout, handle).await {
            Err(_) => Err(StewardError::CommandTimeout(timeout.as_secs())),
            Ok(Err(join_err)) if join_err.is_panic() => Err(StewardError::HandlerCrashed(
                "tool body panicked".to_string(),
            )),
            Ok(Err(join_err)) => Err(StewardError::HandlerCrashed(join_err.to_string())),
            Ok(Ok(result)) => result,
        }
    }
}

#[async_trait]
impl ExecutionBoundary for ProcessBoundary {
    async fn run(&self, invocation: Invocation, timeout: Duration) -> ExecOutcome {
        let label = invocation.describe();
        let started = Instant::now();
        tracing::debug!("Executing: {}", label);

        let result = match invocation {
            Invocation::Command { argv, cwd } => Self::run_command(argv, cwd, timeout).await,
            Invocation::Native { call, .. } => Self::run_native(call, timeout).await,
        };

        let duration = started.elapsed();
        match result {
            Ok(output) => ExecOutcome::ok(output, duration),
            Err(e) => {
                tracing::warn!("Execution of '{}' failed: {}", label, e);
                let output = match &e {
                    StewardError::CommandFailed { stderr, .. } => stderr.clone(),
                    _ => String::new(),
                };
                ExecOutcome::failed(&e, output, duration)
            }
        }
    }
}

/// Detects: | & ; ' " ` \n < > $
/// First executable file named `program` in a `PATH` directory
pub(crate) fn find_in_path(program: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

fn has_shell_metacharacters(s: &str) -> bool {
    s.chars().any(|c| {
        matches!(
            c,
            '|' | '&' | ';' | '\'' | '"' | '`' | '\n' | '<' | '>' | '$'
        )
    })
}

fn clip(mut s: String) -> String {
    if s.len() > MAX_CAPTURE_BYTES {
        let mut end = MAX_CAPTURE_BYTES;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}
