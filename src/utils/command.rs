//! Utilities for running external tools with deadlines and cancellation

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Description of one external tool invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment; never printed
    pub env: Vec<(String, String)>,
    /// Feed this file to the child's stdin
    pub stdin_file: Option<PathBuf>,
    /// Redirect the child's stdout into this file instead of capturing it
    pub stdout_file: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin_file(mut self, path: impl AsRef<Path>) -> Self {
        self.stdin_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn stdout_file(mut self, path: impl AsRef<Path>) -> Self {
        self.stdout_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Result of a command that ran to completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Program '{0}' not found")]
    NotFound(String),

    #[error("{program} timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("{0} was cancelled")]
    Cancelled(String),

    #[error("Failed to run {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Run a command, honouring its timeout and the cancellation token
///
/// The child is killed when the deadline passes or the token fires. A
/// non-zero exit is not an error here; callers inspect `success`.
pub fn run_command(spec: &CommandSpec, cancel: &CancellationToken) -> Result<CommandOutput, CommandError> {
    if cancel.is_cancelled() {
        return Err(CommandError::Cancelled(spec.program.clone()));
    }

    let io_err = |source| CommandError::Io {
        program: spec.program.clone(),
        source,
    };

    let mut cmd = tokio::process::Command::new(&spec.program);
    cmd.args(&spec.args);
    cmd.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    match spec.stdin_file {
        Some(ref path) => {
            cmd.stdin(Stdio::from(File::open(path).map_err(io_err)?));
        }
        None => {
            cmd.stdin(Stdio::null());
        }
    }

    match spec.stdout_file {
        Some(ref path) => {
            cmd.stdout(Stdio::from(File::create(path).map_err(io_err)?));
        }
        None => {
            cmd.stdout(Stdio::piped());
        }
    }

    debug!("Running command: {}", spec);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(io_err)?;

    let output = runtime.block_on(async {
        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CommandError::NotFound(spec.program.clone())
            } else {
                io_err(e)
            }
        })?;

        let deadline = async {
            match spec.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        // Dropping the wait future drops the child, which kills it
        tokio::select! {
            output = child.wait_with_output() => output.map_err(io_err),
            _ = deadline => Err(CommandError::TimedOut {
                program: spec.program.clone(),
                timeout: spec.timeout.unwrap_or_default(),
            }),
            _ = cancel.cancelled() => Err(CommandError::Cancelled(spec.program.clone())),
        }
    })?;

    let result = CommandOutput {
        exit_code: output.status.code(),
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    };

    if !result.success {
        error!("Command failed: {}", spec);
        error!("Stderr: {}", result.stderr.trim());
    } else if !result.stdout.is_empty() {
        debug!("Command output: {}", result.stdout.trim());
    }

    Ok(result)
}

/// Whether `program` resolves on PATH (or is an existing path)
pub fn program_available(program: &str) -> bool {
    which::which(program).is_ok()
}
