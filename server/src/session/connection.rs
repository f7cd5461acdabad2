//! Individual connection session handling

use crate::command::Dispatcher;
use anyhow::{Context, Result};
use rexec_shared::{
    codec::{self, CodecError, FrameDecoder, MAX_FRAME_SIZE},
    CallHeader, CallReply, CallRequest, ErrorKind, CALL_METHOD,
};
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

/// Where a session is in its request/response cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ReadingRequest,
    Dispatching,
    WritingResponse,
    /// Peer disconnected or the transport failed; terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::ReadingRequest => "reading-request",
            SessionState::Dispatching => "dispatching",
            SessionState::WritingResponse => "writing-response",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One accepted connection and its sequential request/response loop
pub struct Session<S> {
    peer: String,
    stream: S,
    dispatcher: Arc<Dispatcher>,
    decoder: FrameDecoder<CallRequest>,
    read_buf: Vec<u8>,
    max_frame_size: u32,
    state: SessionState,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    /// Create a new session over an accepted stream
    pub fn new(stream: S, peer: impl Into<String>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            peer: peer.into(),
            stream,
            dispatcher,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
            max_frame_size: MAX_FRAME_SIZE,
            state: SessionState::Idle,
        }
    }

    /// Largest reply payload this session will write in one frame
    pub fn with_max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Serve calls until the peer disconnects.
    ///
    /// Request-level failures are answered on the connection. Transport and
    /// codec failures end the session and are returned. Either way the
    /// session finishes in [`SessionState::Closed`].
    pub async fn run(&mut self) -> Result<()> {
        let result = self.serve_calls().await;
        self.transition(SessionState::Closed);

        if let Err(e) = self.stream.shutdown().await {
            trace!("Shutdown of {} failed: {}", self.peer, e);
        }

        result
    }

    async fn serve_calls(&mut self) -> Result<()> {
        loop {
            self.transition(SessionState::ReadingRequest);
            let Some(call) = self.recv().await? else {
                return Ok(());
            };

            self.transition(SessionState::Dispatching);
            let reply = handle_call(&self.dispatcher, &self.peer, call).await;

            self.transition(SessionState::WritingResponse);
            self.send(reply).await?;

            self.transition(SessionState::Idle);
        }
    }

    /// Read the next call from this session.
    /// Returns `None` if the connection is closed
    async fn recv(&mut self) -> Result<Option<CallRequest>> {
        loop {
            // First try to decode from existing buffer
            if let Some(call) = self
                .decoder
                .decode_next()
                .with_context(|| format!("decode error from {}", self.peer))?
            {
                return Ok(Some(call));
            }

            let n = self
                .stream
                .read(&mut self.read_buf)
                .await
                .with_context(|| format!("read error from {}", self.peer))?;

            if n == 0 {
                if self.decoder.buffer_len() > 0 {
                    debug!(
                        "{} disconnected with {} bytes of partial frame",
                        self.peer,
                        self.decoder.buffer_len()
                    );
                }
                return Ok(None);
            }

            self.decoder.extend(&self.read_buf[..n]);
        }
    }

    /// Write one reply frame.
    ///
    /// A reply too large for a frame is replaced by a `ResponseTooLarge`
    /// error for the same call, so the peer always gets an answer.
    async fn send(&mut self, reply: CallReply) -> Result<()> {
        let encoded = match codec::encode_with_limit(&reply, self.max_frame_size) {
            Err(CodecError::MessageTooLarge { len, max }) => {
                warn!(
                    "Reply to {} is {} bytes, over the {} byte limit",
                    self.peer, len, max
                );
                let oversized = CallReply::error(
                    reply.header.unwrap_or_default(),
                    ErrorKind::ResponseTooLarge,
                    format!("reply of {} bytes exceeds the {} byte frame limit", len, max),
                );
                codec::encode(&oversized)?
            }
            encoded => encoded?,
        };
        self.stream
            .write_all(&encoded)
            .await
            .with_context(|| format!("write error to {}", self.peer))?;
        self.stream.flush().await?;
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        trace!("Session {}: {} -> {}", self.peer, self.state, next);
        self.state = next;
    }
}

/// Answer one call. Never fails: request-level problems become error replies
async fn handle_call(dispatcher: &Dispatcher, peer: &str, call: CallRequest) -> CallReply {
    let Some(header) = call.header else {
        return CallReply::error(
            CallHeader::default(),
            ErrorKind::MalformedRequest,
            "call is missing its header",
        );
    };

    if header.method != CALL_METHOD {
        let message = format!("rpc: can't find method {}", header.method);
        return CallReply::error(header, ErrorKind::UnknownMethod, message);
    }

    let Some(request) = call.request else {
        return CallReply::error(
            header,
            ErrorKind::MalformedRequest,
            "call is missing its request body",
        );
    };

    match dispatcher.dispatch(&request).await {
        Ok(response) => CallReply::response(header, response),
        Err(e) => {
            warn!("Call from {} failed: {}", peer, e);
            CallReply::error(header, e.kind(), e.to_string())
        }
    }
}
