//! Resilient socket layer.
//!
//! Thin wrappers over Tokio's TCP types.  Every wrapper does three things when
//! the underlying call fails:
//!
//! 1. classifies the [`std::io::Error`] into a portable [`ErrorCode`],
//! 2. records an [`ErrorRecord`](crate::ErrorRecord) with the severity the call
//!    site demands into the caller's [`ErrorBatch`],
//! 3. returns a [`SocketError`] so the caller can decide what to do next.
//!
//! `connect` and `close` additionally retry transient failures under a
//! [`RetryPolicy`] (3 attempts, 1 second apart, by default).
//!
//! # Severity by call site
//!
//! | Call            | Client side | Server side                          |
//! |-----------------|-------------|--------------------------------------|
//! | bind / listen   | -           | critical                             |
//! | accept          | -           | non-critical if interrupted, else critical |
//! | connect         | critical    | -                                    |
//! | send / recv     | critical    | non-critical, except reset (critical) |
//! | close           | non-critical | non-critical                        |

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::debug;

use crate::error::{ErrorBatch, ErrorCode, Severity};

/// Listen backlog for the server socket.
pub const LISTEN_BACKLOG: u32 = 128;

/// A classified transport failure.
#[derive(Debug, Error)]
#[error("{operation} failed ({code}): {source}")]
pub struct SocketError {
    /// The wrapper that failed, e.g. `"connect"`.
    pub operation: &'static str,
    pub code: ErrorCode,
    /// Severity recorded for this failure at its call site.
    pub severity: Severity,
    #[source]
    pub source: io::Error,
}

/// Which side of the conversation is performing a send or receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    Client,
    Server,
}

/// Result of one [`recv`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    /// `n` bytes were read into the buffer.
    Data(usize),
    /// The peer closed the connection gracefully (a read of 0 bytes).
    Closed,
    /// The read failed; the failure is already recorded in the batch.
    Failed(ErrorCode),
}

/// Maps an I/O error to its portable code.
pub fn classify(err: &io::Error) -> ErrorCode {
    use io::ErrorKind;
    match err.kind() {
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => ErrorCode::ConnectionReset,
        ErrorKind::Interrupted => ErrorCode::Interrupted,
        ErrorKind::AddrInUse => ErrorCode::AddressInUse,
        ErrorKind::AddrNotAvailable => ErrorCode::AddressUnavailable,
        ErrorKind::NetworkDown => ErrorCode::NetworkDown,
        ErrorKind::NetworkUnreachable => ErrorCode::NetworkUnreachable,
        ErrorKind::TimedOut => ErrorCode::TimedOut,
        ErrorKind::ConnectionRefused => ErrorCode::ConnectionRefused,
        ErrorKind::HostUnreachable => ErrorCode::HostUnreachable,
        _ => ErrorCode::Unknown,
    }
}

/// `true` for the connect failures worth another attempt.
pub fn is_transient_connect_error(code: ErrorCode) -> bool {
    matches!(
        code,
        ErrorCode::ConnectionRefused
            | ErrorCode::TimedOut
            | ErrorCode::HostUnreachable
            | ErrorCode::NetworkUnreachable
    )
}

// ── Retry policy ──────────────────────────────────────────────────────────────

/// Bounded retry: `attempts` tries with a fixed `pause` between consecutive
/// tries (so `attempts - 1` pauses in total).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            pause: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, pause: Duration) -> Self {
        Self { attempts, pause }
    }

    /// Runs `op` until it succeeds, `retryable` rejects the error, or the
    /// attempts are exhausted.  Returns the last error on failure.
    ///
    /// A policy with `attempts == 0` still makes one attempt.
    pub async fn run<T, F, Fut, P>(&self, mut op: F, retryable: P) -> io::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = io::Result<T>>,
        P: Fn(&io::Error) -> bool,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && retryable(&e) => {
                    debug!(attempt, attempts, "retrying after error: {e}");
                    tokio::time::sleep(self.pause).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ── Socket operations ─────────────────────────────────────────────────────────

fn fail(
    operation: &'static str,
    source: io::Error,
    severity: Severity,
    batch: &mut ErrorBatch,
) -> SocketError {
    let code = classify(&source);
    batch.add(code, severity, format!("{operation} failed: {source}"), operation);
    SocketError {
        operation,
        code,
        severity,
        source,
    }
}

/// Creates, binds, and listens on a TCP socket at `addr`.
///
/// # Errors
///
/// Any failure is recorded as critical.
pub fn bind_listener(addr: SocketAddr, batch: &mut ErrorBatch) -> Result<TcpListener, SocketError> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(|e| fail("socket", e, Severity::Critical, batch))?;

    #[cfg(not(windows))]
    socket
        .set_reuseaddr(true)
        .map_err(|e| fail("socket", e, Severity::Critical, batch))?;

    socket
        .bind(addr)
        .map_err(|e| fail("bind", e, Severity::Critical, batch))?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|e| fail("listen", e, Severity::Critical, batch))
}

/// Accepts one connection.
///
/// # Errors
///
/// An interrupted accept is recorded as non-critical; every other failure is
/// critical and should end the accept loop.
pub async fn accept(
    listener: &TcpListener,
    batch: &mut ErrorBatch,
) -> Result<(TcpStream, SocketAddr), SocketError> {
    listener.accept().await.map_err(|e| {
        let severity = if e.kind() == io::ErrorKind::Interrupted {
            Severity::NonCritical
        } else {
            Severity::Critical
        };
        fail("accept", e, severity, batch)
    })
}

/// Connects to `addr`, retrying transient failures under `policy`.
///
/// # Errors
///
/// The final failure is recorded as critical.
pub async fn connect(
    addr: SocketAddr,
    policy: &RetryPolicy,
    batch: &mut ErrorBatch,
) -> Result<TcpStream, SocketError> {
    policy
        .run(
            || TcpStream::connect(addr),
            |e| is_transient_connect_error(classify(e)),
        )
        .await
        .map_err(|e| fail("connect", e, Severity::Critical, batch))
}

/// Resolves `host:port` to the first socket address.
///
/// # Errors
///
/// Lookup failures and empty results are recorded as critical
/// `address-resolution` errors.
pub async fn resolve(
    host: &str,
    port: u16,
    batch: &mut ErrorBatch,
) -> Result<SocketAddr, SocketError> {
    let failure = |source: io::Error, batch: &mut ErrorBatch| {
        batch.add(
            ErrorCode::AddressResolution,
            Severity::Critical,
            format!("could not resolve {host}: {source}"),
            "resolve",
        );
        SocketError {
            operation: "resolve",
            code: ErrorCode::AddressResolution,
            severity: Severity::Critical,
            source,
        }
    };

    match tokio::net::lookup_host((host, port)).await {
        Ok(mut addrs) => addrs.next().ok_or_else(|| {
            failure(
                io::Error::new(io::ErrorKind::NotFound, "no addresses returned"),
                batch,
            )
        }),
        Err(e) => Err(failure(e, batch)),
    }
}

fn transfer_severity(code: ErrorCode, context: Context) -> Severity {
    match (context, code) {
        (Context::Client, _) => Severity::Critical,
        (Context::Server, ErrorCode::ConnectionReset) => Severity::Critical,
        (Context::Server, _) => Severity::NonCritical,
    }
}

/// Writes all of `data` as one frame.
///
/// # Errors
///
/// Severity follows [`Context`]: always critical on the client; on the server
/// only a reset is critical.
pub async fn send<W>(
    writer: &mut W,
    data: &[u8],
    context: Context,
    batch: &mut ErrorBatch,
) -> Result<(), SocketError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    match writer.write_all(data).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let severity = transfer_severity(classify(&e), context);
            Err(fail("send", e, severity, batch))
        }
    }
}

/// Reads once into `buf`.
///
/// A read of 0 bytes is reported as [`RecvOutcome::Closed`], not as an error.
pub async fn recv<R>(
    reader: &mut R,
    buf: &mut [u8],
    context: Context,
    batch: &mut ErrorBatch,
) -> RecvOutcome
where
    R: AsyncRead + Unpin + ?Sized,
{
    match reader.read(buf).await {
        Ok(0) => RecvOutcome::Closed,
        Ok(n) => RecvOutcome::Data(n),
        Err(e) => {
            let severity = transfer_severity(classify(&e), context);
            RecvOutcome::Failed(fail("recv", e, severity, batch).code)
        }
    }
}

/// Shuts down the write side of a connection, retrying any failure under
/// `policy`.  A socket that is already disconnected counts as closed.
///
/// # Errors
///
/// The final failure is recorded as non-critical.
pub async fn close<W>(
    writer: &mut W,
    policy: &RetryPolicy,
    batch: &mut ErrorBatch,
) -> Result<(), SocketError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match writer.shutdown().await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => return Ok(()),
            Err(e) if attempt < attempts => {
                debug!(attempt, attempts, "retrying close after error: {e}");
                tokio::time::sleep(policy.pause).await;
                attempt += 1;
            }
            Err(e) => return Err(fail("close", e, Severity::NonCritical, batch)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
