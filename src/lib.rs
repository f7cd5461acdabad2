//! rexec client
//!
//! Calls named commands on a rexec server and returns their exit code,
//! stdout and stderr.

pub mod client;
pub mod transport;

pub use client::{call, Client, ClientError};
pub use rexec_shared::{Request, Response};
