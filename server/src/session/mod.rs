//! Per-connection sessions
//!
//! Each accepted connection gets its own session that reads calls, hands
//! them to the dispatcher and writes replies, one at a time, until the peer
//! disconnects.

mod connection;

pub use connection::{Session, SessionState};
