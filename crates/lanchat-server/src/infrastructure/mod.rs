//! Infrastructure layer for the chat server.
//!
//! Contains the OS-facing adapters: TCP sockets and the per-connection
//! protocol engine (`network`) and configuration file persistence
//! (`storage`).

pub mod network;
pub mod storage;
