//! Network infrastructure for the chat server.
//!
//! # Sub-modules
//!
//! - **`registry`** – The session registry: every connected peer keyed by its
//!   connection id, behind a multiple-readers / single-writer lock.
//!
//! - **`secret`** – Generation of the 24-character secret key that regular
//!   peers must present to join.
//!
//! - **`auth`** – The per-connection handshake state machine that validates
//!   AUTH frames and answers with ERROR or NOTIFICATION frames.
//!
//! - **`broadcast`** – Relays a chat message to every registered session.
//!
//! - **`server`** – The accept loop, the per-client handler, and the
//!   [`ServerHandle`](server::ServerHandle) used to shut everything down.
//!
//! - **`local_ip`** – The address peers on the same network connect to.
//!
//! - **`public_ip`** – Best-effort discovery of the host's public address.

pub mod auth;
pub mod broadcast;
pub mod local_ip;
pub mod public_ip;
pub mod registry;
pub mod secret;
pub mod server;
