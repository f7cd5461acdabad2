//! rexec server
//!
//! Serves a fixed registry of named shell commands to remote clients. A
//! client names a command; the server runs it through a shell and replies
//! with the exit code, stdout and stderr.

pub mod command;
pub mod config;
pub mod server;
pub mod session;

pub use command::{CommandRegistry, CommandSpec, Executor};
pub use server::{Listener, Server};
