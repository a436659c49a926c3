//! Network infrastructure for the client.
//!
//! Owns the TCP connection to the chat server and the background receive
//! loop that turns server frames into [`EventSink`] callbacks.
//!
//! Architecture:
//! - [`ChatClient`] holds the write half of the connection behind a mutex so
//!   the caller's sends never interleave with the loop's teardown.
//! - The receive loop owns the read half and runs as its own task.  It stops
//!   when the server closes, a read fails, or [`ChatClient::leave`] cancels
//!   its token; in every case it clears the running flag and closes the
//!   socket.
//! - Calling [`ChatClient::join`] while already connected re-sends AUTH over
//!   the open connection instead of dialling again, so a rejected key or
//!   username can be retried in place.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use lanchat_core::net::{self, Context};
use lanchat_core::protocol::messages::{MAX_FRAME_SIZE, MAX_MESSAGE_CHARS};
use lanchat_core::{
    decode, ClientFrame, ErrorBatch, ErrorCode, EventSink, RecvOutcome, RetryPolicy, Role,
    ServerFrame, Severity,
};
use tokio::io::AsyncRead;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::join_room::{JoinError, JoinRequest, SendError};

/// The live connection to a server.
struct Connection {
    /// Distinguishes this connection from a later one made by the same client.
    generation: u64,
    writer: OwnedWriteHalf,
    shutdown: CancellationToken,
}

struct ClientInner {
    sink: Arc<dyn EventSink>,
    retry: RetryPolicy,
    running: AtomicBool,
    next_generation: AtomicU64,
    connection: Mutex<Option<Connection>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

/// One participant's session with a chat server.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<ClientInner>,
}

impl ChatClient {
    pub fn new(sink: Arc<dyn EventSink>, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                sink,
                retry,
                running: AtomicBool::new(false),
                next_generation: AtomicU64::new(0),
                connection: Mutex::new(None),
                receiver: Mutex::new(None),
            }),
        }
    }

    /// `true` while the receive loop is running.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Validates `request`, connects if not yet connected, and sends AUTH.
    ///
    /// The server's answer arrives asynchronously through the event sink: an
    /// `auth-success` notification or an ERROR frame.  Admins get no answer.
    ///
    /// # Errors
    ///
    /// Local validation failures, or a batch describing the connect / send
    /// failure.  Every error is also reported to the event sink: validation
    /// failures as a server error of the offending field's subtype, the rest
    /// through `on_error`.
    pub async fn join(&self, request: &JoinRequest) -> Result<(), JoinError> {
        let mut batch = ErrorBatch::new();
        if let Err(e) = request.validate(&mut batch) {
            match e.field_error() {
                Some((kind, text)) => self.inner.sink.on_server_error(kind, &text),
                None => batch.report(self.inner.sink.as_ref()),
            }
            return Err(e);
        }
        let auth = ClientFrame::Auth(request.auth_request()).to_wire();

        let mut connection = self.inner.connection.lock().await;
        if self.is_running() {
            if let Some(conn) = connection.as_mut() {
                debug!(username = %request.username, "re-sending AUTH on open connection");
                return send_auth(&mut conn.writer, &auth, &mut batch, &self.inner.sink).await;
            }
        }

        let stream = match net::connect(request.server, &self.inner.retry, &mut batch).await {
            Ok(stream) => stream,
            Err(_) => {
                batch.report(self.inner.sink.as_ref());
                return Err(JoinError::Connect(batch));
            }
        };
        info!(server = %request.server, username = %request.username, role = %request.role, "connected");

        let (reader, mut writer) = stream.into_split();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let shutdown = CancellationToken::new();

        if let Err(e) = send_auth(&mut writer, &auth, &mut batch, &self.inner.sink).await {
            let mut cleanup = ErrorBatch::new();
            let _ = net::close(&mut writer, &self.inner.retry, &mut cleanup).await;
            cleanup.report(self.inner.sink.as_ref());
            return Err(e);
        }

        *connection = Some(Connection {
            generation,
            writer,
            shutdown: shutdown.clone(),
        });
        self.inner.running.store(true, Ordering::SeqCst);
        drop(connection);

        let task = tokio::spawn(receive_loop(
            Arc::clone(&self.inner),
            reader,
            request.role,
            generation,
            shutdown,
        ));
        if let Some(previous) = self.inner.receiver.lock().await.replace(task) {
            // The previous loop already stopped; it only needs reaping.
            previous.abort();
        }
        Ok(())
    }

    /// Sends one chat message.
    ///
    /// # Errors
    ///
    /// [`SendError::TooLong`] for text over 250 characters,
    /// [`SendError::NotConnected`] without a live connection, or the transport
    /// failure, which also stops the session.
    pub async fn send_message(&self, text: &str) -> Result<(), SendError> {
        let len = text.chars().count();
        if len > MAX_MESSAGE_CHARS {
            return Err(SendError::TooLong {
                len,
                max: MAX_MESSAGE_CHARS,
            });
        }

        let mut connection = self.inner.connection.lock().await;
        let conn = match connection.as_mut() {
            Some(conn) if self.is_running() => conn,
            _ => return Err(SendError::NotConnected),
        };

        let mut batch = ErrorBatch::new();
        let frame = ClientFrame::message(text).to_wire();
        match net::send(&mut conn.writer, frame.as_bytes(), Context::Client, &mut batch).await {
            Ok(()) => Ok(()),
            Err(_) => {
                batch.report(self.inner.sink.as_ref());
                // Client-side transport failures are fatal for the session.
                conn.shutdown.cancel();
                self.inner.running.store(false, Ordering::SeqCst);
                Err(SendError::Transport(batch))
            }
        }
    }

    /// Leaves the room: stops the receive loop and closes the socket.
    ///
    /// Safe to call when not connected.
    pub async fn leave(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let connection = self.inner.connection.lock().await.take();
        if let Some(mut conn) = connection {
            conn.shutdown.cancel();
            let mut batch = ErrorBatch::new();
            let _ = net::close(&mut conn.writer, &self.inner.retry, &mut batch).await;
            batch.report(self.inner.sink.as_ref());
            info!("left chat room");
        }

        let receiver = self.inner.receiver.lock().await.take();
        if let Some(task) = receiver {
            let _ = task.await;
        }
    }
}

async fn send_auth(
    writer: &mut OwnedWriteHalf,
    auth: &str,
    batch: &mut ErrorBatch,
    sink: &Arc<dyn EventSink>,
) -> Result<(), JoinError> {
    match net::send(writer, auth.as_bytes(), Context::Client, batch).await {
        Ok(()) => Ok(()),
        Err(_) => {
            batch.report(sink.as_ref());
            Err(JoinError::Send(std::mem::take(batch)))
        }
    }
}

// ── Receive loop ──────────────────────────────────────────────────────────────

/// Reads server frames until the server leaves, a read fails, or `shutdown`
/// is cancelled.
async fn receive_loop<R>(
    inner: Arc<ClientInner>,
    mut reader: R,
    role: Role,
    generation: u64,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let sink = inner.sink.as_ref();
    let mut buf = vec![0u8; MAX_FRAME_SIZE + 1];

    loop {
        let mut batch = ErrorBatch::new();
        let outcome = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            outcome = net::recv(&mut reader, &mut buf, Context::Client, &mut batch) => outcome,
        };

        match outcome {
            RecvOutcome::Data(n) => deliver(&buf[..n], role, sink, &mut batch),
            RecvOutcome::Closed => {
                info!("server closed the connection");
                if role != Role::Admin {
                    batch.add(
                        ErrorCode::ServerDisconnected,
                        Severity::Critical,
                        "Server disconnected",
                        "receive-loop",
                    );
                }
                batch.report(sink);
                break;
            }
            RecvOutcome::Failed(code) => {
                warn!(%code, "receive failed; leaving room");
                batch.report(sink);
                break;
            }
        }
        batch.report(sink);
    }

    // The close may retry; senders must not wait on the lock meanwhile.
    if let Some(mut conn) = take_connection(&inner, generation).await {
        let mut cleanup = ErrorBatch::new();
        let _ = net::close(&mut conn.writer, &inner.retry, &mut cleanup).await;
        cleanup.report(sink);
    }
    debug!(generation, "receive loop stopped");
}

/// Detaches the connection `generation` belongs to, if it is still current,
/// and marks the client stopped.  A newer connection is left alone.
async fn take_connection(inner: &ClientInner, generation: u64) -> Option<Connection> {
    let mut connection = inner.connection.lock().await;
    if connection.as_ref().map(|c| c.generation) != Some(generation) {
        return None;
    }
    inner.running.store(false, Ordering::SeqCst);
    connection.take()
}

/// Routes one received frame to the sink.
fn deliver(bytes: &[u8], role: Role, sink: &dyn EventSink, batch: &mut ErrorBatch) {
    match ServerFrame::parse(bytes) {
        Ok(ServerFrame::Relay { sender, payload }) => {
            sink.on_message(&sender, &decode(&payload));
        }
        // The admin hosts the server and does not act on its replies.
        Ok(_) if role == Role::Admin => {}
        Ok(ServerFrame::Error { kind, text }) => sink.on_server_error(kind, &text),
        Ok(ServerFrame::Notification { kind, text }) => sink.on_notification(kind, &text),
        Err(e) => batch.add(
            ErrorCode::MalformedFrame,
            Severity::NonCritical,
            format!("dropped frame from server: {e}"),
            "receive-loop",
        ),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
