//! Command executor - runs a shell command line and captures its output

use std::io;
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Shell used to interpret command lines unless configured otherwise
pub const DEFAULT_SHELL: &str = "sh";

/// Captured result of a command that ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// The command could not be run, or its outcome could not be interpreted.
///
/// A non-zero exit is not an error; it is reported through `Execution`.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("failed to start shell `{shell}`: {source}")]
    Spawn { shell: String, source: io::Error },

    #[error("failed to wait for command: {0}")]
    Wait(#[source] io::Error),

    #[error("command terminated by signal {0}")]
    Signaled(i32),

    #[error("command terminated without an exit status")]
    NoExitStatus,
}

/// Runs command lines through a shell interpreter as child processes
#[derive(Debug, Clone)]
pub struct Executor {
    shell: String,
}

impl Executor {
    /// Create an executor using [`DEFAULT_SHELL`]
    pub fn new() -> Self {
        Self::with_shell(DEFAULT_SHELL)
    }

    /// Create an executor that runs command lines as `<shell> -c <line>`
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Run `command_line` to completion, buffering all of stdout and stderr.
    ///
    /// Only the calling task waits on the child. The child is not killed if
    /// the returned future is dropped.
    pub async fn execute(&self, command_line: &str) -> Result<Execution, ExecutionError> {
        debug!("Executing command: {}", command_line);

        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                shell: self.shell.clone(),
                source,
            })?;

        let output = child.wait_with_output().await.map_err(ExecutionError::Wait)?;
        let exit_code = exit_code(output.status)?;

        let execution = Execution {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!("Exit code: {}", execution.exit_code);
        debug!("Stdout: {}", execution.stdout);
        debug!("Stderr: {}", execution.stderr);

        Ok(execution)
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

fn exit_code(status: ExitStatus) -> Result<i32, ExecutionError> {
    if let Some(code) = status.code() {
        return Ok(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Err(ExecutionError::Signaled(signal));
        }
    }

    Err(ExecutionError::NoExitStatus)
}
