//! Protocol module containing frame types, field limits, and the delimiter codec.

pub mod codec;
pub mod messages;

pub use codec::{decode, encode, ProtocolError};
pub use messages::*;
