//! Join requests and the local checks made before contacting a server.
//!
//! A regular join needs the room's 24-character secret key; an admin join
//! (the room's host) does not.  Both need a username of at most 20
//! characters without the protocol delimiter.  These rules are checked here so
//! an obviously bad request never opens a socket.

use std::net::SocketAddr;

use lanchat_core::protocol::messages::{check_username, SECRET_KEY_LENGTH};
use lanchat_core::{
    AuthRequest, ErrorBatch, ErrorCode, ProtocolError, Role, ServerErrorKind, Severity,
};
use thiserror::Error;

/// Shown against the key field when the key has the wrong length.
pub const SECRET_KEY_LENGTH_TEXT: &str = "Secret key must be exactly 24 characters long";

/// Shown against the username field when the name is too long.
pub const USERNAME_TOO_LONG_TEXT: &str = "Username exceeds buffer size";

/// Errors returned by [`ChatClient::join`](crate::ChatClient::join).
#[derive(Debug, Error)]
pub enum JoinError {
    #[error("Secret key must be exactly 24 characters long (got {len})")]
    SecretKeyLength { len: usize },

    #[error("Username exceeds buffer size ({len} characters, at most 20)")]
    UsernameTooLong { len: usize },

    #[error("invalid username: {0}")]
    InvalidUsername(ProtocolError),

    #[error("could not connect to the server:\n{0}")]
    Connect(ErrorBatch),

    #[error("could not send the AUTH frame:\n{0}")]
    Send(ErrorBatch),
}

impl JoinError {
    /// The form field a local validation failure belongs to, with the text
    /// to show next to it.  `None` for connect and send failures.
    ///
    /// These are delivered through
    /// [`EventSink::on_server_error`](lanchat_core::EventSink::on_server_error)
    /// so a UI treats a bad key typed locally the same as one the server
    /// refused.
    pub fn field_error(&self) -> Option<(ServerErrorKind, String)> {
        match self {
            JoinError::SecretKeyLength { .. } => {
                Some((ServerErrorKind::SecretKey, SECRET_KEY_LENGTH_TEXT.to_string()))
            }
            JoinError::UsernameTooLong { .. } => {
                Some((ServerErrorKind::Username, USERNAME_TOO_LONG_TEXT.to_string()))
            }
            JoinError::InvalidUsername(e) => {
                Some((ServerErrorKind::Username, format!("Invalid username: {e}")))
            }
            JoinError::Connect(_) | JoinError::Send(_) => None,
        }
    }
}

/// Errors returned by [`ChatClient::send_message`](crate::ChatClient::send_message).
#[derive(Debug, Error)]
pub enum SendError {
    #[error("not connected to a chat room")]
    NotConnected,

    #[error("message too long: {len} characters exceeds {max}")]
    TooLong { len: usize, max: usize },

    #[error("could not send the message:\n{0}")]
    Transport(ErrorBatch),
}

/// Everything needed to join a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub server: SocketAddr,
    pub role: Role,
    /// Ignored for [`Role::Admin`].
    pub secret_key: String,
    pub username: String,
}

impl JoinRequest {
    pub fn regular(
        server: SocketAddr,
        secret_key: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            server,
            role: Role::Regular,
            secret_key: secret_key.into(),
            username: username.into(),
        }
    }

    pub fn admin(server: SocketAddr, username: impl Into<String>) -> Self {
        Self {
            server,
            role: Role::Admin,
            secret_key: String::new(),
            username: username.into(),
        }
    }

    /// Checks the key length and username bounds.
    ///
    /// Each violation is also recorded in `batch` as a non-critical error.
    ///
    /// # Errors
    ///
    /// The first violation found, key before username.
    pub fn validate(&self, batch: &mut ErrorBatch) -> Result<(), JoinError> {
        if self.role == Role::Regular {
            let len = self.secret_key.chars().count();
            if len != SECRET_KEY_LENGTH {
                let err = JoinError::SecretKeyLength { len };
                batch.add(
                    ErrorCode::SecretKeyLength,
                    Severity::NonCritical,
                    err.to_string(),
                    "join",
                );
                return Err(err);
            }
        }

        match check_username(&self.username) {
            Ok(()) => Ok(()),
            Err(ProtocolError::FieldTooLong { .. }) => {
                let err = JoinError::UsernameTooLong {
                    len: self.username.chars().count(),
                };
                batch.add(
                    ErrorCode::UsernameTooLong,
                    Severity::NonCritical,
                    err.to_string(),
                    "join",
                );
                Err(err)
            }
            Err(e) => {
                batch.add(
                    ErrorCode::Unknown,
                    Severity::NonCritical,
                    format!("invalid username: {e}"),
                    "join",
                );
                Err(JoinError::InvalidUsername(e))
            }
        }
    }

    /// The AUTH frame payload for this request.
    pub fn auth_request(&self) -> AuthRequest {
        match self.role {
            Role::Admin => AuthRequest::admin(self.username.clone()),
            Role::Regular => AuthRequest::regular(self.secret_key.clone(), self.username.clone()),
        }
    }
}
