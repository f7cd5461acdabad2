//! Connection server: accept loop and lazy dispatcher setup

use crate::command::{CommandRegistry, CommandSpec, Dispatcher, Executor};
use crate::session::Session;
use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::io;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Pause before accepting again after the listener itself reported an error
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A source of incoming connections for [`Server::serve_with_shutdown`]
#[async_trait]
pub trait Listener: Send {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Wait for the next connection and a printable peer address
    async fn accept(&mut self) -> io::Result<(Self::Stream, String)>;
}

#[async_trait]
impl Listener for TcpListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, String)> {
        let (stream, addr) = TcpListener::accept(self).await?;
        Ok((stream, addr.to_string()))
    }
}

/// A remote command execution server.
///
/// The registry is fixed when the server is built. The dispatcher is
/// created on the first connection and shared by every session after it.
pub struct Server {
    registry: Arc<CommandRegistry>,
    executor: Executor,
    dispatcher: OnceLock<Arc<Dispatcher>>,
}

impl Server {
    /// Create a server for the given commands using the default shell
    pub fn new(commands: Vec<CommandSpec>) -> Self {
        Self {
            registry: Arc::new(CommandRegistry::new(commands)),
            executor: Executor::new(),
            dispatcher: OnceLock::new(),
        }
    }

    /// Use a specific executor for all commands
    pub fn with_executor(mut self, executor: Executor) -> Self {
        self.executor = executor;
        self
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Whether the first connection has been served yet
    pub fn is_initialized(&self) -> bool {
        self.dispatcher.get().is_some()
    }

    fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher
            .get_or_init(|| {
                debug!("Initializing dispatcher for {} commands", self.registry.len());
                Arc::new(Dispatcher::new(self.registry.clone(), self.executor.clone()))
            })
            .clone()
    }

    /// Accept connections forever.
    ///
    /// Each connection is served on its own task.
    pub async fn serve<L: Listener>(self: Arc<Self>, listener: L) {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Accept errors never end the loop. Errors tied to one pending
    /// connection are skipped; anything else (out of descriptors, out of
    /// buffers) is retried after [`ACCEPT_BACKOFF`]. On shutdown the listener
    /// is dropped, which closes it. Sessions that were already accepted keep
    /// running to completion on their own tasks.
    pub async fn serve_with_shutdown<L, F>(self: Arc<Self>, mut listener: L, shutdown: F)
    where
        L: Listener,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    info!("Accepted connection: {}", peer);

                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.serve_conn_from(stream, peer.clone()).await {
                            warn!("Session {} ended with error: {:#}", peer, e);
                        }
                    });
                }
                Err(e) if is_connection_error(&e) => {
                    warn!("Accept failed for one connection: {}", e);
                }
                Err(e) => {
                    error!("Accept failed: {}, retrying in {:?}", e, ACCEPT_BACKOFF);
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                    }
                }
            }
        }

        info!("Listener closed, no longer accepting connections");
    }

    /// Serve a single connection on the current task until it closes
    pub async fn serve_conn<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        self.serve_conn_from(stream, "<conn>".to_string()).await
    }

    async fn serve_conn_from<S>(&self, stream: S, peer: String) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let mut session = Session::new(stream, peer, self.dispatcher());
        let result = session.run().await;
        debug!("Session {} closed", session.peer());
        result
    }
}

// Errors tied to a single pending connection rather than the listener itself
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rexec_shared::{
        call_reply::Outcome, codec, codec::FrameDecoder, CallReply, CallRequest, Request,
    };
    use std::collections::VecDeque;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::sync::{mpsc, oneshot};

    fn server() -> Arc<Server> {
        Arc::new(Server::new(vec![
            CommandSpec::new("hello", "echo hello"),
            CommandSpec::new("slow", "sleep 1; echo done"),
        ]))
    }

    async fn call<S>(stream: &mut S, seq: u64, name: &str) -> CallReply
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let frame = codec::encode(&CallRequest::call(seq, Request::new(name))).unwrap();
        stream.write_all(&frame).await.unwrap();

        let mut decoder = FrameDecoder::<CallReply>::new();
        let mut buf = [0u8; 1024];
        loop {
            if let Some(reply) = decoder.decode_next().unwrap() {
                return reply;
            }
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before reply");
            decoder.extend(&buf[..n]);
        }
    }

    /// Reports its queued errors, then hands out in-memory connections
    struct FlakyListener {
        errors: VecDeque<io::Error>,
        conns: mpsc::Receiver<DuplexStream>,
    }

    impl FlakyListener {
        fn new(
            errors: impl IntoIterator<Item = io::Error>,
        ) -> (Self, mpsc::Sender<DuplexStream>) {
            let (tx, conns) = mpsc::channel(1);
            let listener = Self {
                errors: errors.into_iter().collect(),
                conns,
            };
            (listener, tx)
        }
    }

    #[async_trait]
    impl Listener for FlakyListener {
        type Stream = DuplexStream;

        async fn accept(&mut self) -> io::Result<(DuplexStream, String)> {
            if let Some(e) = self.errors.pop_front() {
                return Err(e);
            }
            match self.conns.recv().await {
                Some(stream) => Ok((stream, "duplex".to_string())),
                None => std::future::pending().await,
            }
        }
    }

    fn stdout_of(reply: CallReply) -> String {
        match reply.outcome {
            Some(Outcome::Response(response)) => response.stdout,
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_dispatcher_initialized_lazily_once() {
        let server = server();
        assert!(!server.is_initialized());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let server = server.clone();
            tasks.push(tokio::spawn(async move { server.dispatcher() }));
        }

        let mut dispatchers = Vec::new();
        for task in tasks {
            dispatchers.push(task.await.unwrap());
        }

        assert!(server.is_initialized());
        assert!(dispatchers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn test_serve_conn_over_duplex() {
        let server = server();
        let (mut client, conn) = duplex(64 * 1024);
        let session = tokio::spawn({
            let server = server.clone();
            async move { server.serve_conn(conn).await }
        });

        assert_eq!(stdout_of(call(&mut client, 1, "hello").await), "hello\n");
        drop(client);

        assert!(session.await.unwrap().is_ok());
        assert!(server.is_initialized());
    }

    #[tokio::test]
    async fn test_concurrent_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server().serve(listener));

        let slow = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            call(&mut stream, 1, "slow").await
        });

        // A fast call on a second connection is not held up by the slow one
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let fast = tokio::time::timeout(Duration::from_millis(800), call(&mut stream, 1, "hello"))
            .await
            .expect("fast call blocked behind slow call");
        assert_eq!(stdout_of(fast), "hello\n");

        assert_eq!(stdout_of(slow.await.unwrap()), "done\n");
    }

    #[tokio::test]
    async fn test_shutdown_keeps_in_flight_sessions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let serving = tokio::spawn(server().serve_with_shutdown(listener, async {
            let _ = stop_rx.await;
        }));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        // Make sure the connection was accepted before closing the listener
        assert_eq!(stdout_of(call(&mut stream, 1, "hello").await), "hello\n");

        stop_tx.send(()).unwrap();
        serving.await.unwrap();

        // The accepted session still serves calls
        assert_eq!(stdout_of(call(&mut stream, 2, "slow").await), "done\n");

        // New connections are refused once the listener is gone
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_accept_errors_do_not_stop_serving() {
        let (listener, conn_tx) = FlakyListener::new([
            io::Error::from_raw_os_error(24), // EMFILE
            io::Error::from_raw_os_error(23), // ENFILE
            io::Error::from(io::ErrorKind::OutOfMemory),
            io::Error::from(io::ErrorKind::ConnectionAborted),
        ]);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let serving = tokio::spawn(server().serve_with_shutdown(listener, async {
            let _ = stop_rx.await;
        }));

        // Once descriptors are available again the next connection is served
        let (mut client, conn) = duplex(64 * 1024);
        conn_tx.send(conn).await.unwrap();
        assert_eq!(stdout_of(call(&mut client, 1, "hello").await), "hello\n");
        assert!(!serving.is_finished());

        stop_tx.send(()).unwrap();
        serving.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_accept_backoff() {
        let (listener, _conn_tx) =
            FlakyListener::new((0..100).map(|_| io::Error::from_raw_os_error(24)));
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let serving = tokio::spawn(server().serve_with_shutdown(listener, async {
            let _ = stop_rx.await;
        }));

        tokio::time::sleep(ACCEPT_BACKOFF / 2).await;
        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), serving)
            .await
            .expect("serve kept retrying after shutdown")
            .unwrap();
    }
}
