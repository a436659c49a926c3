//! Server accept loop and per-client handler.
//!
//! # Task layout (for beginners)
//!
//! ```text
//!                    ┌──────────────┐
//!   TcpListener ───▶ │ accept loop  │── insert ──▶ SessionRegistry
//!                    └──────┬───────┘
//!                           │ spawn (TaskTracker)
//!              ┌────────────┼────────────┐
//!              ▼            ▼            ▼
//!          handler 1    handler 2    handler N     (one per connection)
//! ```
//!
//! Everything the tasks share lives in one [`ServerContext`] behind an `Arc`:
//! the registry, the secret key, the retry policy, the event sink, the
//! cancellation token that acts as the run flag, and the task tracker that
//! supervises every spawned task.
//!
//! Each loop waits on its socket call *and* on the token with `select!`, so
//! [`ServerHandle::shutdown`] unblocks an idle `accept` or `recv` at once
//! instead of waiting for the peer to act.

use std::net::SocketAddr;
use std::sync::Arc;

use lanchat_core::net::{self, Context};
use lanchat_core::protocol::messages::MAX_FRAME_SIZE;
use lanchat_core::{
    ClientFrame, ErrorBatch, ErrorCode, EventSink, RecvOutcome, RetryPolicy, ServerErrorKind,
    ServerFrame, Severity,
};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::auth::{Handshake, NOT_AUTHENTICATED};
use super::broadcast::broadcast;
use super::registry::{send_frame, ConnectionId, Session, SessionRegistry, SharedWriter};
use super::secret::SecretKey;

/// Reply text for a frame that failed to parse.
pub const MALFORMED_FRAME: &str = "Malformed frame";

/// State shared by the accept loop and every per-client handler.
pub struct ServerContext {
    pub registry: SessionRegistry,
    pub secret: SecretKey,
    pub retry: RetryPolicy,
    pub sink: Arc<dyn EventSink>,
    /// Cancelled when the server stops; the run flag of every loop.
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
}

impl ServerContext {
    pub fn new(secret: SecretKey, retry: RetryPolicy, sink: Arc<dyn EventSink>) -> Self {
        Self {
            registry: SessionRegistry::new(retry),
            secret,
            retry,
            sink,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    fn report(&self, batch: &ErrorBatch) {
        batch.report(self.sink.as_ref());
    }
}

/// A running server.
///
/// Dropping the handle cancels the server without waiting for its tasks;
/// call [`shutdown`](Self::shutdown) to wait for a clean stop.
pub struct ServerHandle {
    ctx: Arc<ServerContext>,
    local_addr: SocketAddr,
}

impl ServerHandle {
    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.ctx.secret
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.ctx.registry
    }

    pub fn is_running(&self) -> bool {
        !self.ctx.shutdown.is_cancelled()
    }

    /// Stops accepting, drains every session, and waits for all supervised
    /// tasks.  Afterwards the registry is empty and the listener is closed.
    pub async fn shutdown(self) {
        info!(addr = %self.local_addr, "shutting down chat server");
        self.ctx.shutdown.cancel();
        self.ctx.tracker.close();
        self.ctx.tracker.wait().await;
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.ctx.shutdown.cancel();
    }
}

/// Binds `addr`, generates the room's secret key, and starts the accept loop.
///
/// # Errors
///
/// Returns the batch describing the bind/listen failure; it has already been
/// reported to `sink`.
pub async fn start_server(
    addr: SocketAddr,
    retry: RetryPolicy,
    sink: Arc<dyn EventSink>,
) -> Result<ServerHandle, ErrorBatch> {
    let mut batch = ErrorBatch::new();
    let listener = match net::bind_listener(addr, &mut batch) {
        Ok(listener) => listener,
        Err(_) => {
            batch.report(sink.as_ref());
            return Err(batch);
        }
    };
    let local_addr = match listener.local_addr() {
        Ok(local) => local,
        Err(e) => {
            batch.add(
                net::classify(&e),
                Severity::Critical,
                format!("could not read listener address: {e}"),
                "start-server",
            );
            batch.report(sink.as_ref());
            return Err(batch);
        }
    };

    let ctx = Arc::new(ServerContext::new(SecretKey::generate(), retry, sink));
    info!(addr = %local_addr, "chat server listening");
    ctx.tracker.spawn(accept_loop(Arc::clone(&ctx), listener));

    Ok(ServerHandle { ctx, local_addr })
}

// ── Accept loop ───────────────────────────────────────────────────────────────

/// Accepts connections until the token is cancelled or `accept` fails
/// critically, then drains the registry and closes the listener.
pub async fn accept_loop(ctx: Arc<ServerContext>, listener: TcpListener) {
    loop {
        let mut batch = ErrorBatch::new();
        let accepted = tokio::select! {
            biased;
            () = ctx.shutdown.cancelled() => break,
            accepted = net::accept(&listener, &mut batch) => accepted,
        };

        match accepted {
            Ok((stream, address)) => register(&ctx, stream, address).await,
            Err(e) if e.severity == Severity::NonCritical => {
                debug!("accept interrupted; continuing");
                ctx.report(&batch);
            }
            Err(e) => {
                warn!("accept failed critically, stopping server: {e}");
                ctx.report(&batch);
                ctx.shutdown.cancel();
                break;
            }
        }
    }

    let mut cleanup = ErrorBatch::new();
    let drained = ctx.registry.remove_all(&mut cleanup).await;
    drop(listener);
    info!(drained, "accept loop stopped");
    ctx.report(&cleanup);
}

async fn register(ctx: &Arc<ServerContext>, stream: TcpStream, address: SocketAddr) {
    let id = Uuid::new_v4();
    let (reader, writer) = stream.into_split();
    let session = Session::new(id, address, writer);
    let handler_writer = session.writer();

    if let Err(e) = ctx.registry.insert(session).await {
        let mut batch = ErrorBatch::new();
        batch.add(
            ErrorCode::Resource,
            Severity::Critical,
            format!("could not register {address}: {e}"),
            "accept-loop",
        );
        ctx.report(&batch);
        return;
    }

    info!(%id, %address, "peer connected");
    ctx.tracker
        .spawn(handle_client(Arc::clone(ctx), id, reader, handler_writer));
}

// ── Per-client handler ────────────────────────────────────────────────────────

/// Reads frames from one peer and dispatches them until the peer leaves, the
/// connection resets, or the server stops.  Always removes the session on
/// exit.
pub async fn handle_client(
    ctx: Arc<ServerContext>,
    id: ConnectionId,
    mut reader: OwnedReadHalf,
    writer: SharedWriter,
) {
    let mut handshake = Handshake::new(id);
    // One spare byte so an oversized frame is detectable.
    let mut buf = vec![0u8; MAX_FRAME_SIZE + 1];

    loop {
        let mut batch = ErrorBatch::new();
        let outcome = tokio::select! {
            biased;
            () = ctx.shutdown.cancelled() => break,
            outcome = net::recv(&mut reader, &mut buf, Context::Server, &mut batch) => outcome,
        };

        match outcome {
            RecvOutcome::Data(n) => {
                dispatch(&ctx, &mut handshake, &writer, &buf[..n], &mut batch).await;
                ctx.report(&batch);
            }
            RecvOutcome::Closed => {
                debug!(%id, "peer closed the connection");
                break;
            }
            RecvOutcome::Failed(ErrorCode::ConnectionReset) => {
                ctx.report(&batch);
                break;
            }
            RecvOutcome::Failed(_) => ctx.report(&batch),
        }
    }

    handshake.close();
    let mut disconnect = ErrorBatch::new();
    if ctx.registry.remove(id, &mut disconnect).await {
        info!(%id, username = handshake.username(), "peer disconnected");
    }
    ctx.report(&disconnect);
}

/// Handles one received frame.
async fn dispatch(
    ctx: &ServerContext,
    handshake: &mut Handshake,
    writer: &SharedWriter,
    bytes: &[u8],
    batch: &mut ErrorBatch,
) {
    let frame = match ClientFrame::parse(bytes) {
        Ok(frame) => frame,
        Err(e) => {
            batch.add(
                ErrorCode::MalformedFrame,
                Severity::NonCritical,
                format!("dropped frame: {e}"),
                "client-handler",
            );
            let reply = ServerFrame::error(ServerErrorKind::General, MALFORMED_FRAME);
            let _ = send_frame(writer, &reply, batch).await;
            return;
        }
    };

    match frame {
        ClientFrame::Auth(request) => {
            let outcome = handshake
                .process(&request, &ctx.registry, &ctx.secret)
                .await;
            if let Some(reply) = outcome.reply() {
                let _ = send_frame(writer, &reply, batch).await;
            }
        }
        ClientFrame::Message { payload } if handshake.is_authenticated() => {
            broadcast(&ctx.registry, &payload, handshake.username(), batch).await;
        }
        ClientFrame::Message { .. } => {
            let reply = ServerFrame::error(ServerErrorKind::General, NOT_AUTHENTICATED);
            let _ = send_frame(writer, &reply, batch).await;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use lanchat_core::{ChannelSink, ChatEvent};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn quick_retry() -> RetryPolicy {
        RetryPolicy::new(1, Duration::from_millis(1))
    }

    async fn start() -> (ServerHandle, tokio::sync::mpsc::UnboundedReceiver<ChatEvent>) {
        let (sink, events) = ChannelSink::new();
        let handle = start_server("127.0.0.1:0".parse().unwrap(), quick_retry(), Arc::new(sink))
            .await
            .unwrap();
        (handle, events)
    }

    async fn read_frame(stream: &mut TcpStream) -> String {
        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        String::from_utf8(buf[..n].to_vec()).unwrap()
    }

    async fn wait_for_sessions(handle: &ServerHandle, expected: usize) {
        for _ in 0..500 {
            if handle.registry().len().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("registry never reached {expected} sessions");
    }

    #[tokio::test]
    async fn test_accepted_connection_is_registered_as_regular() {
        // Arrange
        let (handle, _events) = start().await;

        // Act
        let _stream = TcpStream::connect(handle.local_addr()).await.unwrap();

        // Assert
        wait_for_sessions(&handle, 1).await;
        let sessions = handle.registry().snapshot().await;
        assert_eq!(sessions[0].role, lanchat_core::Role::Regular);
        assert!(!sessions[0].authenticated);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_message_before_auth_is_refused() {
        let (handle, _events) = start().await;
        let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();

        stream.write_all(b"2:hello").await.unwrap();

        assert_eq!(read_frame(&mut stream).await, "0:3:Not authenticated");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_frame_is_answered_and_connection_kept() {
        // Arrange
        let (handle, mut events) = start().await;
        let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();

        // Act
        stream.write_all(b"7:garbage").await.unwrap();
        let reply = read_frame(&mut stream).await;

        // Assert
        assert_eq!(reply, "0:3:Malformed frame");
        match events.recv().await.unwrap() {
            ChatEvent::Error { message, severity } => {
                assert!(message.contains("malformed-frame"));
                assert_eq!(severity, Severity::NonCritical);
            }
            other => panic!("unexpected event {other:?}"),
        }
        stream.write_all(b"1:1:ADMIN:alice").await.unwrap();
        wait_for_sessions(&handle, 1).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_graceful_close_removes_session() {
        let (handle, _events) = start().await;
        let stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        wait_for_sessions(&handle, 1).await;

        drop(stream);

        wait_for_sessions(&handle, 0).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_sessions_and_closes_peers() {
        // Arrange
        let (handle, _events) = start().await;
        let addr = handle.local_addr();
        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();
        wait_for_sessions(&handle, 2).await;

        // Act
        handle.shutdown().await;

        // Assert – both peers see end-of-stream and the port is released
        let mut buf = [0u8; 8];
        assert_eq!(a.read(&mut buf).await.unwrap(), 0);
        assert_eq!(b.read(&mut buf).await.unwrap(), 0);
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_start_server_reports_bind_failure() {
        // Arrange – occupy a port first
        let (first, _events) = start().await;
        let (sink, mut events) = ChannelSink::new();

        // Act
        let result = start_server(first.local_addr(), quick_retry(), Arc::new(sink)).await;

        // Assert
        let batch = result.err().unwrap();
        assert!(batch.is_critical());
        assert!(matches!(
            events.recv().await.unwrap(),
            ChatEvent::Error { severity: Severity::Critical, .. }
        ));
        first.shutdown().await;
    }
}
