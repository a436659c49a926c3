//! Per-connection authentication handshake.
//!
//! ```text
//!            AUTH ok                  disconnect / shutdown
//! Unauthenticated ──────▶ Authenticated ──────────────────▶ Closed
//!      │   ▲
//!      └───┘ AUTH rejected (ERROR frame, peer may retry)
//! ```
//!
//! - An `Admin` AUTH is trusted unconditionally: the admin runs inside the
//!   process that started the server.  No reply is sent.
//! - A `Regular` AUTH must carry the room's secret key and a username that no
//!   other authenticated regular session holds.  Success is answered with an
//!   `auth-success` NOTIFICATION; each rejection with an ERROR frame, leaving
//!   the connection open so the peer can try again.

use lanchat_core::{
    AuthRequest, NotificationKind, Role, ServerErrorKind, ServerFrame,
};
use tracing::{debug, info};

use super::registry::{ConnectionId, RegistryError, SessionRegistry};
use super::secret::SecretKey;

/// Reply text for a wrong secret key.
pub const INCORRECT_SECRET_KEY: &str = "Incorrect secret key";

/// Reply text for a username already in use.
pub const USERNAME_TAKEN: &str = "Username already taken";

/// Reply text for a MESSAGE sent before authenticating.
pub const NOT_AUTHENTICATED: &str = "Not authenticated";

/// Where a connection is in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated,
    Closed,
}

/// Result of processing one AUTH frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Admitted { username: String, role: Role },
    Rejected {
        kind: ServerErrorKind,
        reason: &'static str,
    },
}

impl AuthOutcome {
    /// The frame to send back to the peer, if any.
    pub fn reply(&self) -> Option<ServerFrame> {
        match self {
            AuthOutcome::Admitted {
                role: Role::Admin, ..
            } => None,
            AuthOutcome::Admitted { .. } => {
                Some(ServerFrame::notification(NotificationKind::AuthSuccess, ""))
            }
            AuthOutcome::Rejected { kind, reason } => Some(ServerFrame::error(*kind, reason)),
        }
    }
}

/// Handshake state of one connection.
#[derive(Debug)]
pub struct Handshake {
    id: ConnectionId,
    state: AuthState,
    username: String,
}

impl Handshake {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: AuthState::Unauthenticated,
            username: String::new(),
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == AuthState::Authenticated
    }

    /// Username registered by the last successful AUTH; empty before that.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Validates `request` and, on success, records it in `registry`.
    ///
    /// A rejection never downgrades a connection that is already
    /// authenticated.  A closed handshake ignores further requests.
    pub async fn process(
        &mut self,
        request: &AuthRequest,
        registry: &SessionRegistry,
        secret: &SecretKey,
    ) -> AuthOutcome {
        if self.state == AuthState::Closed {
            return AuthOutcome::Rejected {
                kind: ServerErrorKind::General,
                reason: "Connection closed",
            };
        }

        let outcome = authenticate(self.id, request, registry, secret).await;
        if let AuthOutcome::Admitted { username, role } = &outcome {
            info!(id = %self.id, %username, %role, "peer authenticated");
            self.state = AuthState::Authenticated;
            self.username.clone_from(username);
        }
        outcome
    }

    pub fn close(&mut self) {
        self.state = AuthState::Closed;
    }
}

/// Applies the admission rules for one AUTH request.
pub async fn authenticate(
    id: ConnectionId,
    request: &AuthRequest,
    registry: &SessionRegistry,
    secret: &SecretKey,
) -> AuthOutcome {
    if request.role == Role::Regular {
        let key = request.secret_key.as_deref().unwrap_or_default();
        if !secret.matches(key) {
            debug!(%id, username = %request.username, "rejected: wrong secret key");
            return AuthOutcome::Rejected {
                kind: ServerErrorKind::SecretKey,
                reason: INCORRECT_SECRET_KEY,
            };
        }
    }

    match registry
        .claim_username(id, &request.username, request.role)
        .await
    {
        Ok(()) => AuthOutcome::Admitted {
            username: request.username.clone(),
            role: request.role,
        },
        Err(RegistryError::UsernameTaken(_)) => {
            debug!(%id, username = %request.username, "rejected: username taken");
            AuthOutcome::Rejected {
                kind: ServerErrorKind::Username,
                reason: USERNAME_TAKEN,
            }
        }
        Err(e) => {
            debug!(%id, "rejected: {e}");
            AuthOutcome::Rejected {
                kind: ServerErrorKind::General,
                reason: "Session is no longer registered",
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
