//! Command dispatcher - resolves requests against the registry and runs them

use super::executor::{ExecutionError, Executor};
use super::registry::CommandRegistry;
use rexec_shared::{ErrorKind, Request, Response};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Request-level dispatch failures. These are reported back to the caller;
/// they never end the session or the server.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Command not supported: {0}")]
    CommandNotSupported(String),

    #[error("Failed to execute command {name}: {source}")]
    ExecutionLaunchFailure {
        name: String,
        source: ExecutionError,
    },
}

impl DispatchError {
    /// Wire classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::CommandNotSupported(_) => ErrorKind::CommandNotSupported,
            DispatchError::ExecutionLaunchFailure { .. } => ErrorKind::ExecutionLaunchFailure,
        }
    }
}

/// Dispatches requests to registered commands
pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
    executor: Executor,
}

impl Dispatcher {
    /// Create a new dispatcher over a shared registry
    pub fn new(registry: Arc<CommandRegistry>, executor: Executor) -> Self {
        Self { registry, executor }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Run the command named by `request`.
    ///
    /// `request.args` is accepted but not substituted into the command line.
    pub async fn dispatch(&self, request: &Request) -> Result<Response, DispatchError> {
        let spec = self
            .registry
            .lookup(&request.command)
            .ok_or_else(|| DispatchError::CommandNotSupported(request.command.clone()))?;

        if !request.args.is_empty() {
            debug!(
                "Ignoring {} argument(s) for command {}",
                request.args.len(),
                spec.name
            );
        }

        info!("Running command: {}", spec.name);

        let execution = self.executor.execute(&spec.command).await.map_err(|source| {
            DispatchError::ExecutionLaunchFailure {
                name: spec.name.clone(),
                source,
            }
        })?;

        Ok(Response {
            exit_code: execution.exit_code,
            stdout: execution.stdout,
            stderr: execution.stderr,
        })
    }
}
