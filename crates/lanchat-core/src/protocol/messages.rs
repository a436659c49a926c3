//! All LAN-Chat frame types and field limits.
//!
//! A frame is one colon-delimited ASCII string sent as a single transport
//! write.  The first field is the integer frame type; the remaining fields
//! depend on the type and on the direction of travel:
//!
//! ```text
//! client -> server   1:<role>:<encoded-key | ADMIN>:<username>     AUTH
//! client -> server   2:<encoded-payload>                          MESSAGE
//! server -> client   2:<sender>:<encoded-payload>                 MESSAGE (relay)
//! server -> client   0:<error-subtype>:<text>                     ERROR
//! server -> client   3:<notification-subtype>:<text>              NOTIFICATION
//! ```
//!
//! Parsing is strict: every field is bounded to its documented size and a
//! frame with the wrong number of fields, an unknown tag, or an oversized
//! field is rejected instead of being partially read.

use std::fmt;

use crate::protocol::codec::{
    check_bounds, decode, encode, split_exact, split_with_tail, ProtocolError,
};

// ── Protocol constants ────────────────────────────────────────────────────────

/// The in-band field delimiter.
pub const DELIMITER: char = ':';

/// Exact length of the shared secret key, in characters.
pub const SECRET_KEY_LENGTH: usize = 24;

/// Worst-case length of an encoded secret key (every character a delimiter).
pub const MAX_ENCODED_SECRET_KEY_BYTES: usize = SECRET_KEY_LENGTH * 3;

/// Maximum username length in characters.
pub const MAX_USERNAME_CHARS: usize = 20;

/// Maximum username length in bytes (20 characters of up to 4 UTF-8 bytes).
pub const MAX_USERNAME_BYTES: usize = MAX_USERNAME_CHARS * 4;

/// Maximum message length in characters, before encoding.
pub const MAX_MESSAGE_CHARS: usize = 250;

/// Maximum message length in bytes, before encoding.
pub const MAX_MESSAGE_BYTES: usize = MAX_MESSAGE_CHARS * 4;

/// Maximum message length in bytes after encoding (3x worst-case expansion).
pub const MAX_ENCODED_MESSAGE_BYTES: usize = MAX_MESSAGE_BYTES * 3;

/// Maximum length of ERROR / NOTIFICATION text in characters.
pub const MAX_NOTICE_CHARS: usize = 250;

/// Maximum length of ERROR / NOTIFICATION text in bytes.
pub const MAX_NOTICE_BYTES: usize = MAX_NOTICE_CHARS * 4;

/// Literal sent in the key field of an admin AUTH frame.
pub const ADMIN_KEY_TOKEN: &str = "ADMIN";

/// Largest frame on the wire: the relay MESSAGE frame
/// (`1` tag + `2` delimiters + username + encoded payload).
pub const MAX_FRAME_SIZE: usize = 1 + 2 + MAX_USERNAME_BYTES + MAX_ENCODED_MESSAGE_BYTES;

// ── Frame type codes ──────────────────────────────────────────────────────────

/// Integer tag at the start of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Error = 0,
    Auth = 1,
    Message = 2,
    Notification = 3,
}

impl FrameType {
    /// Maps a wire tag to a frame type.
    pub fn from_code(value: u8) -> Option<Self> {
        match value {
            0 => Some(FrameType::Error),
            1 => Some(FrameType::Auth),
            2 => Some(FrameType::Message),
            3 => Some(FrameType::Notification),
            _ => None,
        }
    }

    /// Reads the type tag (the text before the first delimiter).
    fn of(frame: &str) -> Result<Self, ProtocolError> {
        let tag = frame.split(DELIMITER).next().unwrap_or_default();
        parse_code(tag)
            .and_then(FrameType::from_code)
            .ok_or_else(|| ProtocolError::UnknownFrameType(tag.to_string()))
    }
}

// ── Roles and subtypes ────────────────────────────────────────────────────────

/// The role a session authenticates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Role {
    /// A peer that joined with the secret key.
    #[default]
    Regular = 0,
    /// The host of the room; trusted because it runs the server itself.
    Admin = 1,
}

impl TryFrom<u8> for Role {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0 => Ok(Role::Regular),
            1 => Ok(Role::Admin),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Regular => f.write_str("regular"),
            Role::Admin => f.write_str("admin"),
        }
    }
}

/// Subtype carried by an ERROR frame.
///
/// Code `0` is reserved ("none") and never sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerErrorKind {
    SecretKey = 1,
    Username = 2,
    General = 3,
}

impl TryFrom<u8> for ServerErrorKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            1 => Ok(ServerErrorKind::SecretKey),
            2 => Ok(ServerErrorKind::Username),
            3 => Ok(ServerErrorKind::General),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ServerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerErrorKind::SecretKey => f.write_str("secret-key"),
            ServerErrorKind::Username => f.write_str("username"),
            ServerErrorKind::General => f.write_str("general"),
        }
    }
}

/// Subtype carried by a NOTIFICATION frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NotificationKind {
    AuthSuccess = 0,
    Disconnect = 1,
    Kick = 2,
    Ban = 3,
    General = 4,
}

impl TryFrom<u8> for NotificationKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0 => Ok(NotificationKind::AuthSuccess),
            1 => Ok(NotificationKind::Disconnect),
            2 => Ok(NotificationKind::Kick),
            3 => Ok(NotificationKind::Ban),
            4 => Ok(NotificationKind::General),
            _ => Err(()),
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::AuthSuccess => f.write_str("auth-success"),
            NotificationKind::Disconnect => f.write_str("disconnect"),
            NotificationKind::Kick => f.write_str("kick"),
            NotificationKind::Ban => f.write_str("ban"),
            NotificationKind::General => f.write_str("general"),
        }
    }
}

// ── Frame payloads ────────────────────────────────────────────────────────────

/// AUTH request sent by a client to join the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    /// Role the client asks for.
    pub role: Role,
    /// Raw (decoded) secret key; `None` for the admin role.
    pub secret_key: Option<String>,
    /// Requested username.
    pub username: String,
}

impl AuthRequest {
    /// Builds an admin AUTH request.
    pub fn admin(username: impl Into<String>) -> Self {
        Self {
            role: Role::Admin,
            secret_key: None,
            username: username.into(),
        }
    }

    /// Builds a regular AUTH request carrying the shared secret key.
    pub fn regular(secret_key: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            role: Role::Regular,
            secret_key: Some(secret_key.into()),
            username: username.into(),
        }
    }
}

/// A frame travelling from a client to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// `1:<role>:<key>:<username>`
    Auth(AuthRequest),
    /// `2:<encoded-payload>`; `payload` is kept encoded.
    Message { payload: String },
}

impl ClientFrame {
    /// Builds a MESSAGE frame from raw user text, encoding it.
    pub fn message(text: &str) -> Self {
        ClientFrame::Message {
            payload: encode(text),
        }
    }

    /// Renders the frame as wire text.
    pub fn to_wire(&self) -> String {
        match self {
            ClientFrame::Auth(req) => {
                let key = match (req.role, &req.secret_key) {
                    (Role::Admin, _) | (Role::Regular, None) => ADMIN_KEY_TOKEN.to_string(),
                    (Role::Regular, Some(key)) => encode(key),
                };
                format!(
                    "{}:{}:{}:{}",
                    FrameType::Auth as u8,
                    req.role as u8,
                    key,
                    req.username
                )
            }
            ClientFrame::Message { payload } => {
                format!("{}:{}", FrameType::Message as u8, payload)
            }
        }
    }

    /// Parses one frame received by the server.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] when the frame is oversized, not UTF-8, of an
    /// unknown or server-only type, or has malformed fields.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lanchat_core::protocol::messages::{ClientFrame, Role};
    ///
    /// let frame = ClientFrame::parse(b"1:1:ADMIN:alice").unwrap();
    /// match frame {
    ///     ClientFrame::Auth(req) => {
    ///         assert_eq!(req.role, Role::Admin);
    ///         assert_eq!(req.username, "alice");
    ///     }
    ///     _ => panic!("expected AUTH"),
    /// }
    /// ```
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let frame = frame_text(bytes)?;
        match FrameType::of(frame)? {
            FrameType::Auth => parse_auth(frame).map(ClientFrame::Auth),
            FrameType::Message => {
                let fields = split_exact(frame, 2, "MESSAGE")?;
                let payload = fields[1];
                check_payload(payload)?;
                Ok(ClientFrame::Message {
                    payload: payload.to_string(),
                })
            }
            other => Err(ProtocolError::UnexpectedFrameType(other as u8)),
        }
    }
}

/// A frame travelling from the server to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// `2:<sender>:<encoded-payload>`; `payload` is kept encoded.
    Relay { sender: String, payload: String },
    /// `0:<subtype>:<text>`
    Error { kind: ServerErrorKind, text: String },
    /// `3:<subtype>:<text>`
    Notification { kind: NotificationKind, text: String },
}

impl ServerFrame {
    /// Builds an ERROR frame, truncating `text` to [`MAX_NOTICE_CHARS`].
    pub fn error(kind: ServerErrorKind, text: &str) -> Self {
        ServerFrame::Error {
            kind,
            text: truncate_chars(text, MAX_NOTICE_CHARS),
        }
    }

    /// Builds a NOTIFICATION frame, truncating `text` to [`MAX_NOTICE_CHARS`].
    pub fn notification(kind: NotificationKind, text: &str) -> Self {
        ServerFrame::Notification {
            kind,
            text: truncate_chars(text, MAX_NOTICE_CHARS),
        }
    }

    /// Renders the frame as wire text.
    pub fn to_wire(&self) -> String {
        match self {
            ServerFrame::Relay { sender, payload } => {
                format!("{}:{}:{}", FrameType::Message as u8, sender, payload)
            }
            ServerFrame::Error { kind, text } => {
                format!("{}:{}:{}", FrameType::Error as u8, *kind as u8, text)
            }
            ServerFrame::Notification { kind, text } => {
                format!("{}:{}:{}", FrameType::Notification as u8, *kind as u8, text)
            }
        }
    }

    /// Parses one frame received by a client.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] when the frame is oversized, not UTF-8, of an
    /// unknown or client-only type, or has malformed fields.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let frame = frame_text(bytes)?;
        match FrameType::of(frame)? {
            FrameType::Message => {
                let fields = split_exact(frame, 3, "MESSAGE")?;
                check_username(fields[1])?;
                check_payload(fields[2])?;
                Ok(ServerFrame::Relay {
                    sender: fields[1].to_string(),
                    payload: fields[2].to_string(),
                })
            }
            FrameType::Error => {
                let fields = split_with_tail(frame, 3, "ERROR")?;
                let kind = parse_code(fields[1])
                    .and_then(|v| ServerErrorKind::try_from(v).ok())
                    .ok_or_else(|| invalid("error subtype", fields[1]))?;
                check_bounds("error text", fields[2], MAX_NOTICE_CHARS, MAX_NOTICE_BYTES)?;
                Ok(ServerFrame::Error {
                    kind,
                    text: fields[2].to_string(),
                })
            }
            FrameType::Notification => {
                let fields = split_with_tail(frame, 3, "NOTIFICATION")?;
                let kind = parse_code(fields[1])
                    .and_then(|v| NotificationKind::try_from(v).ok())
                    .ok_or_else(|| invalid("notification subtype", fields[1]))?;
                check_bounds(
                    "notification text",
                    fields[2],
                    MAX_NOTICE_CHARS,
                    MAX_NOTICE_BYTES,
                )?;
                Ok(ServerFrame::Notification {
                    kind,
                    text: fields[2].to_string(),
                })
            }
            FrameType::Auth => Err(ProtocolError::UnexpectedFrameType(FrameType::Auth as u8)),
        }
    }
}

// ── Field validation ──────────────────────────────────────────────────────────

/// Validates a username: non-empty, no delimiter, within both size bounds.
///
/// # Errors
///
/// Returns [`ProtocolError::EmptyField`], [`ProtocolError::InvalidValue`], or
/// [`ProtocolError::FieldTooLong`].
pub fn check_username(username: &str) -> Result<(), ProtocolError> {
    if username.is_empty() {
        return Err(ProtocolError::EmptyField("username"));
    }
    if username.contains(DELIMITER) {
        return Err(invalid("username", username));
    }
    check_bounds("username", username, MAX_USERNAME_CHARS, MAX_USERNAME_BYTES)
}

/// Validates an encoded message payload against the encoded and decoded bounds.
fn check_payload(payload: &str) -> Result<(), ProtocolError> {
    if payload.len() > MAX_ENCODED_MESSAGE_BYTES {
        return Err(ProtocolError::FieldTooLong {
            field: "encoded message",
            len: payload.len(),
            max: MAX_ENCODED_MESSAGE_BYTES,
        });
    }
    check_bounds("message", &decode(payload), MAX_MESSAGE_CHARS, MAX_MESSAGE_BYTES)
}

fn parse_auth(frame: &str) -> Result<AuthRequest, ProtocolError> {
    let fields = split_exact(frame, 4, "AUTH")?;
    let role = parse_code(fields[1])
        .and_then(|v| Role::try_from(v).ok())
        .ok_or_else(|| invalid("role", fields[1]))?;
    let key_field = fields[2];
    if key_field.len() > MAX_ENCODED_SECRET_KEY_BYTES {
        return Err(ProtocolError::FieldTooLong {
            field: "secret key",
            len: key_field.len(),
            max: MAX_ENCODED_SECRET_KEY_BYTES,
        });
    }
    let username = fields[3];
    check_username(username)?;

    let secret_key = match role {
        Role::Admin => None,
        Role::Regular => Some(decode(key_field)),
    };
    Ok(AuthRequest {
        role,
        secret_key,
        username: username.to_string(),
    })
}

fn frame_text(bytes: &[u8]) -> Result<&str, ProtocolError> {
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            len: bytes.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Parses a short decimal code field (tag, role, subtype).
fn parse_code(field: &str) -> Option<u8> {
    if field.is_empty() || field.len() > 3 || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

fn invalid(field: &'static str, value: &str) -> ProtocolError {
    ProtocolError::InvalidValue {
        field,
        value: value.to_string(),
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_frame_size_matches_relay_worst_case() {
        assert_eq!(MAX_FRAME_SIZE, 3083);
    }

    #[test]
    fn test_admin_auth_frame_uses_admin_token() {
        let frame = ClientFrame::Auth(AuthRequest::admin("alice"));
        assert_eq!(frame.to_wire(), "1:1:ADMIN:alice");
    }

    #[test]
    fn test_regular_auth_frame_encodes_secret_key() {
        // Arrange – the key character set includes the delimiter
        let frame = ClientFrame::Auth(AuthRequest::regular("ab:cd", "bob"));

        // Act
        let wire = frame.to_wire();

        // Assert
        assert_eq!(wire, "1:0:ab|C|cd:bob");
    }

    #[test]
    fn test_parse_regular_auth_decodes_secret_key() {
        let frame = ClientFrame::parse(b"1:0:ab|C|cd:bob").unwrap();
        assert_eq!(frame, ClientFrame::Auth(AuthRequest::regular("ab:cd", "bob")));
    }

    #[test]
    fn test_parse_admin_auth_ignores_key_field() {
        let frame = ClientFrame::parse(b"1:1:whatever:alice").unwrap();
        assert_eq!(frame, ClientFrame::Auth(AuthRequest::admin("alice")));
    }

    #[test]
    fn test_parse_auth_rejects_unknown_role() {
        let err = ClientFrame::parse(b"1:7:ADMIN:alice").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidValue { field: "role", .. }));
    }

    #[test]
    fn test_parse_auth_rejects_oversized_username() {
        let wire = format!("1:0:key:{}", "u".repeat(21));
        let err = ClientFrame::parse(wire.as_bytes()).unwrap_err();
        assert!(matches!(err, ProtocolError::FieldTooLong { field: "username", .. }));
    }

    #[test]
    fn test_parse_auth_rejects_missing_username_field() {
        let err = ClientFrame::parse(b"1:0:key").unwrap_err();
        assert!(matches!(err, ProtocolError::FieldCount { expected: 4, actual: 3, .. }));
    }

    #[test]
    fn test_parse_auth_rejects_empty_username() {
        let err = ClientFrame::parse(b"1:0:key:").unwrap_err();
        assert_eq!(err, ProtocolError::EmptyField("username"));
    }

    #[test]
    fn test_client_message_frame_encodes_payload() {
        let frame = ClientFrame::message("hello:world");
        assert_eq!(frame.to_wire(), "2:hello|C|world");
    }

    #[test]
    fn test_parse_client_message_keeps_payload_encoded() {
        let frame = ClientFrame::parse(b"2:hello|C|world").unwrap();
        assert_eq!(
            frame,
            ClientFrame::Message {
                payload: "hello|C|world".to_string()
            }
        );
    }

    #[test]
    fn test_parse_client_message_rejects_raw_delimiter_in_payload() {
        assert!(ClientFrame::parse(b"2:hello:world").is_err());
    }

    #[test]
    fn test_parse_client_message_rejects_too_many_characters() {
        let wire = format!("2:{}", "x".repeat(MAX_MESSAGE_CHARS + 1));
        assert!(matches!(
            ClientFrame::parse(wire.as_bytes()),
            Err(ProtocolError::FieldTooLong { field: "message", .. })
        ));
    }

    #[test]
    fn test_parse_rejects_frame_over_maximum_size() {
        let wire = vec![b'2'; MAX_FRAME_SIZE + 1];
        assert_eq!(
            ClientFrame::parse(&wire),
            Err(ProtocolError::FrameTooLarge {
                len: MAX_FRAME_SIZE + 1,
                max: MAX_FRAME_SIZE
            })
        );
    }

    #[test]
    fn test_parse_rejects_unknown_frame_type() {
        assert_eq!(
            ClientFrame::parse(b"9:x"),
            Err(ProtocolError::UnknownFrameType("9".to_string()))
        );
        assert!(matches!(
            ClientFrame::parse(b"abc"),
            Err(ProtocolError::UnknownFrameType(_))
        ));
    }

    #[test]
    fn test_client_parse_rejects_server_only_frames() {
        assert_eq!(
            ClientFrame::parse(b"0:1:Incorrect secret key"),
            Err(ProtocolError::UnexpectedFrameType(0))
        );
    }

    #[test]
    fn test_relay_frame_wire_format() {
        let frame = ServerFrame::Relay {
            sender: "bob".to_string(),
            payload: "hello|C|world".to_string(),
        };
        assert_eq!(frame.to_wire(), "2:bob:hello|C|world");
    }

    #[test]
    fn test_parse_relay_frame() {
        let frame = ServerFrame::parse(b"2:bob:hello|C|world").unwrap();
        assert_eq!(
            frame,
            ServerFrame::Relay {
                sender: "bob".to_string(),
                payload: "hello|C|world".to_string()
            }
        );
    }

    #[test]
    fn test_error_frame_wire_format() {
        let frame = ServerFrame::error(ServerErrorKind::SecretKey, "Incorrect secret key");
        assert_eq!(frame.to_wire(), "0:1:Incorrect secret key");
    }

    #[test]
    fn test_auth_success_notification_has_empty_text() {
        let frame = ServerFrame::notification(NotificationKind::AuthSuccess, "");
        assert_eq!(frame.to_wire(), "3:0:");
        assert_eq!(ServerFrame::parse(b"3:0:").unwrap(), frame);
    }

    #[test]
    fn test_parse_error_frame_rejects_reserved_subtype() {
        assert!(matches!(
            ServerFrame::parse(b"0:0:none"),
            Err(ProtocolError::InvalidValue { field: "error subtype", .. })
        ));
    }

    #[test]
    fn test_error_constructor_truncates_long_text() {
        let long = "e".repeat(400);
        match ServerFrame::error(ServerErrorKind::General, &long) {
            ServerFrame::Error { text, .. } => assert_eq!(text.chars().count(), MAX_NOTICE_CHARS),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_check_username_rejects_delimiter() {
        assert!(check_username("bo:b").is_err());
        assert!(check_username("bob").is_ok());
    }

    #[test]
    fn test_role_try_from_roundtrips_wire_values() {
        assert_eq!(Role::try_from(Role::Admin as u8), Ok(Role::Admin));
        assert_eq!(Role::try_from(Role::Regular as u8), Ok(Role::Regular));
        assert!(Role::try_from(2).is_err());
    }
}
