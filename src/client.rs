//! Client stub: one connection, one call, one reply

use crate::transport::{TcpConnector, TransportConnector, TransportStream};
use rexec_shared::{
    call_reply::Outcome,
    codec::{self, CodecError, FrameDecoder},
    CallReply, CallRequest, Request, Response, RpcError,
};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Errors returned by a call. A non-zero exit code is not one of them.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The server answered with a request-level error
    #[error("{0}")]
    Remote(RpcError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection closed before a reply was received")]
    ConnectionClosed,
}

/// Calls commands on a server reached through `C`
pub struct Client<C> {
    connector: C,
    sequence_id: AtomicU64,
}

impl<C: TransportConnector> Client<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            sequence_id: AtomicU64::new(0),
        }
    }

    /// Run a registered command and wait for its result
    pub async fn call(&self, command: &str) -> Result<Response, ClientError> {
        self.call_request(Request::new(command)).await
    }

    /// Run a registered command, sending named arguments along
    pub async fn call_with_args(
        &self,
        command: &str,
        args: HashMap<String, String>,
    ) -> Result<Response, ClientError> {
        let mut request = Request::new(command);
        request.args = args;
        self.call_request(request).await
    }

    /// Open a connection, send `request`, wait for exactly one reply, close
    pub async fn call_request(&self, request: Request) -> Result<Response, ClientError> {
        let seq = self.sequence_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut stream = self.connector.connect().await?;
        debug!(
            "Connected via {}, calling {} (seq={})",
            self.connector.name(),
            request.command,
            seq
        );

        let result = exchange(&mut stream, CallRequest::call(seq, request)).await;

        if let Err(e) = TransportStream::shutdown(&mut stream).await {
            debug!("Shutdown after call failed: {}", e);
        }

        let reply = result?;
        if reply.sequence_id() != seq {
            return Err(ClientError::Protocol(format!(
                "reply for call {} while waiting for {}",
                reply.sequence_id(),
                seq
            )));
        }

        match reply.outcome {
            Some(Outcome::Response(response)) => Ok(response),
            Some(Outcome::Error(err)) => Err(ClientError::Remote(err)),
            None => Err(ClientError::Protocol("reply carried no outcome".into())),
        }
    }
}

/// Call `command` on the server listening at `address`
pub async fn call(address: impl Into<String>, command: &str) -> Result<Response, ClientError> {
    Client::new(TcpConnector::new(address)).call(command).await
}

async fn exchange<S: TransportStream>(
    stream: &mut S,
    call: CallRequest,
) -> Result<CallReply, ClientError> {
    let frame = codec::encode(&call)?;
    stream.write_all(&frame).await?;
    stream.flush().await?;

    let mut decoder = FrameDecoder::<CallReply>::new();
    let mut buf = vec![0u8; 4096];
    loop {
        if let Some(reply) = decoder.decode_next()? {
            return Ok(reply);
        }

        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        decoder.extend(&buf[..n]);
    }
}
