//! # lanchat-core
//!
//! Shared library for LAN-Chat containing the text wire protocol, the error
//! aggregator, the host-facing event sink, and the resilient socket layer.
//!
//! This crate is used by both the server and the client applications.
//!
//! # Architecture overview (for beginners)
//!
//! LAN-Chat is a small chat room for a local network.  One machine hosts the
//! room (the *server*, started by the *admin*); other machines *join* it with
//! a shared 24-character secret key and a username.  Every regular message is
//! relayed to every connected session.
//!
//! This crate (`lanchat-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How text travels over the wire.  A frame is a single
//!   colon-delimited ASCII string such as `2:bob:hello|C|world`.  User text
//!   that may contain the delimiter is *encoded* first so the delimiter never
//!   appears literally inside a field.
//!
//! - **`error`** – The error aggregator.  Every operation collects classified,
//!   timestamped failures into an [`ErrorBatch`] and reports one summary with
//!   an overall [`Severity`].
//!
//! - **`events`** – The [`EventSink`] interface through which the engine
//!   notifies the host application (errors, messages, server errors,
//!   notifications).
//!
//! - **`net`** – A thin wrapper over Tokio sockets that classifies every
//!   failure into a portable [`ErrorCode`] and retries transient `connect` and
//!   `close` failures under a bounded [`RetryPolicy`].

pub mod error;
pub mod events;
pub mod net;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `lanchat_core::ErrorBatch` instead of `lanchat_core::error::ErrorBatch`.
pub use error::{ErrorBatch, ErrorCode, ErrorRecord, Severity};
pub use events::{ChannelSink, ChatEvent, EventSink, TracingSink};
pub use net::{Context, RecvOutcome, RetryPolicy, SocketError};
pub use protocol::codec::{decode, encode, ProtocolError};
pub use protocol::messages::{
    AuthRequest, ClientFrame, FrameType, NotificationKind, Role, ServerErrorKind, ServerFrame,
};
