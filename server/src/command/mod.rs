//! Command registry, execution and dispatch
//!
//! This module handles:
//! - Holding the static set of commands the server will run
//! - Running shell command lines and capturing their output
//! - Resolving requests to commands and producing responses

mod dispatcher;
mod executor;
mod registry;

pub use dispatcher::{DispatchError, Dispatcher};
pub use executor::{Execution, ExecutionError, Executor, DEFAULT_SHELL};
pub use registry::{CommandRegistry, CommandSpec};
