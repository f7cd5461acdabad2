//! Protobuf message definitions for the rexec wire protocol
//!
//! These are declared with `prost` derives rather than generated from a
//! `.proto` file; tags are stable and must not be reused.

use std::collections::HashMap;

/// Routing header carried by every call and reply
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CallHeader {
    /// Remote procedure name, e.g. `Server.Call`
    #[prost(string, tag = "1")]
    pub method: String,

    /// Client-chosen sequence id, echoed back in the reply
    #[prost(uint64, tag = "2")]
    pub sequence_id: u64,
}

/// A request to run one registered command
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Request {
    #[prost(string, tag = "1")]
    pub command: String,

    /// Named arguments. Accepted on the wire but never substituted into
    /// the command line by the server.
    #[prost(map = "string, string", tag = "2")]
    pub args: HashMap<String, String>,
}

/// The outcome of running a command to completion
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Response {
    #[prost(int32, tag = "1")]
    pub exit_code: i32,

    #[prost(string, tag = "2")]
    pub stdout: String,

    #[prost(string, tag = "3")]
    pub stderr: String,
}

/// A request-level failure reported instead of a `Response`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RpcError {
    #[prost(enumeration = "ErrorKind", tag = "1")]
    pub kind: i32,

    #[prost(string, tag = "2")]
    pub message: String,
}

/// Client to server frame
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CallRequest {
    #[prost(message, optional, tag = "1")]
    pub header: Option<CallHeader>,

    #[prost(message, optional, tag = "2")]
    pub request: Option<Request>,
}

/// Server to client frame
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CallReply {
    #[prost(message, optional, tag = "1")]
    pub header: Option<CallHeader>,

    #[prost(oneof = "call_reply::Outcome", tags = "2, 3")]
    pub outcome: Option<call_reply::Outcome>,
}

pub mod call_reply {
    /// Either a completed execution or a request-level error
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Outcome {
        #[prost(message, tag = "2")]
        Response(super::Response),

        #[prost(message, tag = "3")]
        Error(super::RpcError),
    }
}

/// Classification of request-level failures
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ErrorKind {
    Unspecified = 0,
    /// The requested name is not in the server's registry
    CommandNotSupported = 1,
    /// The command could not be started, or ended without an exit status
    ExecutionLaunchFailure = 2,
    /// The call named a procedure the server does not export
    UnknownMethod = 3,
    /// The call frame was missing its header or request body
    MalformedRequest = 4,
    /// The command ran but its result does not fit in one reply frame
    ResponseTooLarge = 5,
}
