//! Infrastructure layer for the client.
//!
//! Contains the network adapter that owns the TCP connection to the server.

pub mod network;
