//! Delimiter codec and field tokenizer for the LAN-Chat text protocol.
//!
//! Wire format:
//! ```text
//! <type>:<field1>:<field2>:...
//! ```
//! Frames carry no length prefix and no terminator.  Fields holding
//! user-controlled text are *encoded*: every `:` is replaced by the
//! three-character sentinel `|C|` so the delimiter never appears inside them.
//!
//! # Why not a length prefix? (for beginners)
//!
//! Binary protocols usually prefix each message with its length so the
//! receiver knows where one message ends.  This protocol instead relies on one
//! transport read carrying exactly one frame.  That holds for the small,
//! human-paced frames of a chat room on a LAN, but TCP is free to split or
//! merge writes, so a burst of frames can be misread.  The framing is kept
//! as-is for wire compatibility; see `DESIGN.md`.
//!
//! # Capacity
//!
//! Encoding expands each delimiter from one byte to three, so the worst-case
//! output is three times the input.  The `*_with_capacity` variants stop at a
//! byte budget instead of growing without bound; characters that do not fit
//! are dropped silently, and a sentinel is never split.

use thiserror::Error;

use crate::protocol::messages::DELIMITER;

/// The three-character replacement for [`DELIMITER`] inside encoded fields.
pub const SENTINEL: &str = "|C|";

/// Errors that can occur while parsing a frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame is longer than the largest frame the protocol allows.
    #[error("frame too large: {len} bytes exceeds the {max}-byte limit")]
    FrameTooLarge { len: usize, max: usize },

    /// The frame bytes are not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// The leading type tag is missing or not a known frame type.
    #[error("unknown frame type: {0:?}")]
    UnknownFrameType(String),

    /// The frame type is valid but not expected in this direction.
    #[error("unexpected frame type {0} for this direction")]
    UnexpectedFrameType(u8),

    /// The frame does not have the number of fields its type requires.
    #[error("{frame} frame needs {expected} fields, got {actual}")]
    FieldCount {
        frame: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A numeric field (role, subtype) holds an unknown value.
    #[error("invalid {field} value: {value:?}")]
    InvalidValue { field: &'static str, value: String },

    /// A field exceeds its documented size bound.
    #[error("{field} too long: {len} exceeds {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// A required field is empty.
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Replaces every delimiter in `raw` with [`SENTINEL`].
///
/// # Examples
///
/// ```rust
/// use lanchat_core::protocol::codec::{decode, encode};
///
/// let escaped = encode("hello:world");
/// assert_eq!(escaped, "hello|C|world");
/// assert_eq!(decode(&escaped), "hello:world");
/// ```
pub fn encode(raw: &str) -> String {
    encode_with_capacity(raw, raw.len() * SENTINEL.len())
}

/// Replaces every [`SENTINEL`] in `escaped` with the delimiter.
///
/// This is the exact inverse of [`encode`] for any input that contains
/// neither the literal text `|C|` nor `|C` followed by a delimiter.
pub fn decode(escaped: &str) -> String {
    decode_with_capacity(escaped, escaped.len())
}

/// Encodes `raw`, writing at most `capacity` bytes of output.
///
/// Scans left to right and stops at the first character that would overflow
/// the budget; the rest of the input is dropped.
pub fn encode_with_capacity(raw: &str, capacity: usize) -> String {
    let mut out = String::with_capacity(capacity.min(raw.len() * SENTINEL.len()));
    for ch in raw.chars() {
        let piece_len = if ch == DELIMITER {
            SENTINEL.len()
        } else {
            ch.len_utf8()
        };
        if out.len() + piece_len > capacity {
            break;
        }
        if ch == DELIMITER {
            out.push_str(SENTINEL);
        } else {
            out.push(ch);
        }
    }
    out
}

/// Decodes `escaped`, writing at most `capacity` bytes of output.
pub fn decode_with_capacity(escaped: &str, capacity: usize) -> String {
    let mut out = String::with_capacity(capacity.min(escaped.len()));
    let mut rest = escaped;
    while let Some(ch) = rest.chars().next() {
        let (piece, consumed) = if rest.starts_with(SENTINEL) {
            (DELIMITER, SENTINEL.len())
        } else {
            (ch, ch.len_utf8())
        };
        if out.len() + piece.len_utf8() > capacity {
            break;
        }
        out.push(piece);
        rest = &rest[consumed..];
    }
    out
}

// ── Tokenizer ─────────────────────────────────────────────────────────────────

/// Splits `frame` into exactly `expected` delimiter-separated fields.
///
/// Fails with [`ProtocolError::FieldCount`] when there are more or fewer.
pub(crate) fn split_exact<'a>(
    frame: &'a str,
    expected: usize,
    name: &'static str,
) -> Result<Vec<&'a str>, ProtocolError> {
    let fields: Vec<&str> = frame.split(DELIMITER).collect();
    if fields.len() != expected {
        return Err(ProtocolError::FieldCount {
            frame: name,
            expected,
            actual: fields.len(),
        });
    }
    Ok(fields)
}

/// Splits `frame` into `expected` fields where the last one keeps any
/// delimiters it contains (free text).
pub(crate) fn split_with_tail<'a>(
    frame: &'a str,
    expected: usize,
    name: &'static str,
) -> Result<Vec<&'a str>, ProtocolError> {
    let fields: Vec<&str> = frame.splitn(expected, DELIMITER).collect();
    if fields.len() != expected {
        return Err(ProtocolError::FieldCount {
            frame: name,
            expected,
            actual: fields.len(),
        });
    }
    Ok(fields)
}

/// Rejects `value` when it has more than `max_chars` characters or more than
/// `max_bytes` bytes.
pub(crate) fn check_bounds(
    field: &'static str,
    value: &str,
    max_chars: usize,
    max_bytes: usize,
) -> Result<(), ProtocolError> {
    if value.len() > max_bytes {
        return Err(ProtocolError::FieldTooLong {
            field,
            len: value.len(),
            max: max_bytes,
        });
    }
    let chars = value.chars().count();
    if chars > max_chars {
        return Err(ProtocolError::FieldTooLong {
            field,
            len: chars,
            max: max_chars,
        });
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
