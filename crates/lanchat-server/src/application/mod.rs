//! Application layer use cases for the chat server.
//!
//! # Sub-modules
//!
//! - **`host_room`** – Starts a room on this machine: the server, the host's
//!   own admin session, and the best-effort public IP lookup that tells remote
//!   peers where to connect.

pub mod host_room;
