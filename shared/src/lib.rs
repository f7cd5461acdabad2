//! rexec Shared Protocol Types
//!
//! This crate provides the wire types and codec shared by the rexec
//! server and its clients.

pub mod codec;
pub mod proto;

use std::fmt;

// Re-export commonly used types at crate root
pub use proto::*;

/// The single remote procedure exported by the server
pub const CALL_METHOD: &str = "Server.Call";

impl CallHeader {
    /// Create a new header for the given method and sequence id
    pub fn new(method: impl Into<String>, sequence_id: u64) -> Self {
        Self {
            method: method.into(),
            sequence_id,
        }
    }
}

impl Request {
    /// Create a request for a command with no arguments
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Default::default(),
        }
    }

    /// Add a named argument
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

impl CallRequest {
    /// Wrap a request in a `Server.Call` frame
    pub fn call(sequence_id: u64, request: Request) -> Self {
        Self {
            header: Some(CallHeader::new(CALL_METHOD, sequence_id)),
            request: Some(request),
        }
    }
}

impl CallReply {
    /// Create a reply carrying a completed execution
    pub fn response(header: CallHeader, response: Response) -> Self {
        Self {
            header: Some(header),
            outcome: Some(call_reply::Outcome::Response(response)),
        }
    }

    /// Create a reply carrying a request-level error
    pub fn error(header: CallHeader, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            header: Some(header),
            outcome: Some(call_reply::Outcome::Error(RpcError::new(kind, message))),
        }
    }

    /// Sequence id of the call this reply answers (0 if absent)
    pub fn sequence_id(&self) -> u64 {
        self.header.as_ref().map(|h| h.sequence_id).unwrap_or_default()
    }
}

impl RpcError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Decoded error kind, `Unspecified` for values this build doesn't know
    pub fn error_kind(&self) -> ErrorKind {
        ErrorKind::try_from(self.kind).unwrap_or(ErrorKind::Unspecified)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_kind(), self.message)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Unspecified => "unspecified error",
            ErrorKind::CommandNotSupported => "command not supported",
            ErrorKind::ExecutionLaunchFailure => "execution launch failure",
            ErrorKind::UnknownMethod => "unknown method",
            ErrorKind::MalformedRequest => "malformed request",
            ErrorKind::ResponseTooLarge => "response too large",
        };
        f.write_str(name)
    }
}
