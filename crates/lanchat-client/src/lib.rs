//! lanchat-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does lanchat-client do? (for beginners)
//!
//! The *client* is one participant in a chat room hosted by another machine
//! on the local network.  It:
//!
//! 1. Checks the secret key and username locally before touching the network.
//! 2. Connects to the server (retrying transient failures) and sends an AUTH
//!    frame.
//! 3. Runs a background receive loop that decodes relayed messages and server
//!    ERROR / NOTIFICATION frames and hands them to an
//!    [`EventSink`](lanchat_core::EventSink).
//! 4. Sends the user's messages until it leaves or the server goes away.
//!
//! The room's host joins its own room through this same client, with the
//! `Admin` role.

/// Application layer: join-request validation.
pub mod application;

/// Infrastructure layer: the TCP session with the server.
pub mod infrastructure;

pub use application::join_room::{JoinError, JoinRequest, SendError};
pub use infrastructure::network::ChatClient;
