//! Application layer use cases for the client.
//!
//! - **`join_room`** – Builds and validates a join request (secret key length,
//!   username bounds) before any network I/O, and defines the errors a
//!   client session can return to its caller.

pub mod join_room;
