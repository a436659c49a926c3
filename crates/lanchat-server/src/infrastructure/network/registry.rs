//! The session registry: every connected peer, keyed by connection id.
//!
//! # Locking discipline (for beginners)
//!
//! Many tasks touch the registry at once: the accept loop inserts, every
//! per-client handler updates and removes its own entry, and broadcasts walk
//! the whole map.  The map sits behind a [`tokio::sync::RwLock`]:
//!
//! - `insert`, `update`, `claim_username`, `remove`, and `remove_all` take the
//!   **write** lock, so mutations are serialized against each other and
//!   against readers.
//! - `for_each`, `is_username_taken`, `get`, `len`, and broadcasts take the
//!   **read** lock, so they may run alongside each other but never observe a
//!   half-applied mutation.
//!
//! A session is torn down by taking it *out* of the map under the write lock
//! and closing its socket afterwards.  Only one caller can win that removal,
//! so the socket is closed exactly once even when a handler and the shutdown
//! path race each other.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use lanchat_core::net::{self, Context};
use lanchat_core::{ErrorBatch, RetryPolicy, Role, ServerFrame, SocketError};
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard};
use tracing::debug;
use uuid::Uuid;

/// Unique key of one accepted connection.
pub type ConnectionId = Uuid;

/// The write side of a peer connection.
pub type FrameWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Shared handle to a peer's write side; the mutex keeps frames from
/// interleaving when a broadcast and an auth reply race.
pub type SharedWriter = Arc<Mutex<FrameWriter>>;

/// Error type for registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Memory for a new entry could not be reserved.
    #[error("could not allocate a registry entry: {0}")]
    Resource(String),

    /// A session with this connection id is already registered.
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),

    /// No session with this connection id is registered.
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),

    /// Another authenticated regular session already uses this name.
    #[error("username {0:?} is already taken")]
    UsernameTaken(String),
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Server-side record of one connected peer.
pub struct Session {
    pub id: ConnectionId,
    pub address: SocketAddr,
    /// Empty until the peer authenticates.
    pub username: String,
    pub role: Role,
    pub authenticated: bool,
    writer: SharedWriter,
}

impl Session {
    /// Creates an unauthenticated `Regular` session.
    pub fn new<W>(id: ConnectionId, address: SocketAddr, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            address,
            username: String::new(),
            role: Role::Regular,
            authenticated: false,
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// A second handle to this session's write side.
    pub fn writer(&self) -> SharedWriter {
        Arc::clone(&self.writer)
    }

    /// Sends one frame to this peer.
    ///
    /// # Errors
    ///
    /// Returns the classified [`SocketError`], already recorded in `batch`.
    pub async fn send_frame(
        &self,
        frame: &ServerFrame,
        batch: &mut ErrorBatch,
    ) -> Result<(), SocketError> {
        send_frame(&self.writer, frame, batch).await
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            address: self.address,
            username: self.username.clone(),
            role: self.role,
            authenticated: self.authenticated,
        }
    }

    async fn close(self, policy: &RetryPolicy, batch: &mut ErrorBatch) {
        let mut writer = self.writer.lock().await;
        // Failures are already recorded in the batch.
        let _ = net::close(&mut *writer, policy, batch).await;
    }
}

/// Sends one frame through a shared writer.
///
/// # Errors
///
/// Returns the classified [`SocketError`], already recorded in `batch`.
pub async fn send_frame(
    writer: &SharedWriter,
    frame: &ServerFrame,
    batch: &mut ErrorBatch,
) -> Result<(), SocketError> {
    let wire = frame.to_wire();
    let mut writer = writer.lock().await;
    net::send(&mut *writer, wire.as_bytes(), Context::Server, batch).await
}

/// Plain-data view of a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: ConnectionId,
    pub address: SocketAddr,
    pub username: String,
    pub role: Role,
    pub authenticated: bool,
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Concurrency-safe collection of connected sessions.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ConnectionId, Session>>,
    close_policy: RetryPolicy,
}

impl SessionRegistry {
    /// Creates an empty registry; `close_policy` governs socket teardown.
    pub fn new(close_policy: RetryPolicy) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            close_policy,
        }
    }

    /// Registers a newly accepted session.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Resource`] when the map cannot grow, and
    /// [`RegistryError::DuplicateConnection`] when the id is already present.
    pub async fn insert(&self, session: Session) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(RegistryError::DuplicateConnection(session.id));
        }
        sessions
            .try_reserve(1)
            .map_err(|e| RegistryError::Resource(e.to_string()))?;
        debug!(id = %session.id, address = %session.address, "session registered");
        sessions.insert(session.id, session);
        Ok(())
    }

    /// Sets the username and role of `id` and marks it authenticated.
    ///
    /// Does nothing when `id` is not registered; returns whether it was.
    pub async fn update(&self, id: ConnectionId, username: &str, role: Role) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&id) {
            Some(session) => {
                session.username = username.to_string();
                session.role = role;
                session.authenticated = true;
                true
            }
            None => false,
        }
    }

    /// Checks the username and applies [`update`](Self::update) under a single
    /// write lock, so two concurrent joins with the same name cannot both win.
    ///
    /// Admins are never refused, and a session may re-claim the name it
    /// already holds.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UsernameTaken`] or [`RegistryError::UnknownConnection`].
    pub async fn claim_username(
        &self,
        id: ConnectionId,
        username: &str,
        role: Role,
    ) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write().await;
        let held_by_other = sessions
            .values()
            .any(|s| s.id != id && holds_regular_name(s, username));
        if role == Role::Regular && held_by_other {
            return Err(RegistryError::UsernameTaken(username.to_string()));
        }
        let session = sessions
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;
        session.username = username.to_string();
        session.role = role;
        session.authenticated = true;
        Ok(())
    }

    /// Removes `id` and closes its socket.
    ///
    /// Idempotent: returns `false` (and closes nothing) when `id` is already
    /// gone.
    pub async fn remove(&self, id: ConnectionId, batch: &mut ErrorBatch) -> bool {
        let removed = self.sessions.write().await.remove(&id);
        match removed {
            Some(session) => {
                debug!(%id, username = %session.username, "session removed");
                session.close(&self.close_policy, batch).await;
                true
            }
            None => false,
        }
    }

    /// Removes and closes every session.  Used at shutdown.
    pub async fn remove_all(&self, batch: &mut ErrorBatch) -> usize {
        let drained: Vec<Session> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, session)| session).collect()
        };
        let count = drained.len();
        for session in drained {
            session.close(&self.close_policy, batch).await;
        }
        debug!(count, "all sessions removed");
        count
    }

    /// `true` when an authenticated `Regular` session already uses `username`.
    pub async fn is_username_taken(&self, username: &str) -> bool {
        username_taken(&*self.sessions.read().await, username)
    }

    /// Calls `f` once for every registered session under the read lock.
    pub async fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Session),
    {
        for session in self.sessions.read().await.values() {
            f(session);
        }
    }

    /// Read access to the whole map, held for as long as the guard lives.
    pub async fn read(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, Session>> {
        self.sessions.read().await
    }

    pub async fn get(&self, id: ConnectionId) -> Option<SessionInfo> {
        self.sessions.read().await.get(&id).map(Session::info)
    }

    pub async fn snapshot(&self) -> Vec<SessionInfo> {
        self.sessions.read().await.values().map(Session::info).collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

fn username_taken(sessions: &HashMap<ConnectionId, Session>, username: &str) -> bool {
    sessions.values().any(|s| holds_regular_name(s, username))
}

fn holds_regular_name(session: &Session, username: &str) -> bool {
    session.authenticated && session.role == Role::Regular && session.username == username
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    fn make_registry() -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(RetryPolicy::new(
            1,
            Duration::from_millis(1),
        )))
    }

    fn make_session() -> (Session, DuplexStream) {
        let (ours, theirs) = duplex(4096);
        let session = Session::new(Uuid::new_v4(), "127.0.0.1:5000".parse().unwrap(), ours);
        (session, theirs)
    }

    #[tokio::test]
    async fn test_insert_then_get_returns_unauthenticated_regular() {
        // Arrange
        let registry = make_registry();
        let (session, _peer) = make_session();
        let id = session.id;

        // Act
        registry.insert(session).await.unwrap();

        // Assert
        let info = registry.get(id).await.unwrap();
        assert_eq!(info.role, Role::Regular);
        assert_eq!(info.username, "");
        assert!(!info.authenticated);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_connection_id() {
        let registry = make_registry();
        let (first, _p1) = make_session();
        let id = first.id;
        registry.insert(first).await.unwrap();

        let (ours, _p2) = duplex(16);
        let dup = Session::new(id, "127.0.0.1:5001".parse().unwrap(), ours);

        assert_eq!(
            registry.insert(dup).await,
            Err(RegistryError::DuplicateConnection(id))
        );
    }

    #[tokio::test]
    async fn test_update_is_noop_for_unknown_id() {
        let registry = make_registry();
        assert!(!registry.update(Uuid::new_v4(), "bob", Role::Regular).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_username_taken_only_counts_authenticated_regulars() {
        // Arrange – an admin "alice", an unauthenticated peer, a regular "bob"
        let registry = make_registry();
        let (admin, _a) = make_session();
        let (pending, _p) = make_session();
        let (bob, _b) = make_session();
        let (admin_id, bob_id) = (admin.id, bob.id);
        registry.insert(admin).await.unwrap();
        registry.insert(pending).await.unwrap();
        registry.insert(bob).await.unwrap();

        // Act
        registry.update(admin_id, "alice", Role::Admin).await;
        registry.update(bob_id, "bob", Role::Regular).await;

        // Assert
        assert!(registry.is_username_taken("bob").await);
        assert!(!registry.is_username_taken("alice").await);
        assert!(!registry.is_username_taken("").await);
    }

    #[tokio::test]
    async fn test_claim_username_refuses_taken_name() {
        let registry = make_registry();
        let (first, _p1) = make_session();
        let (second, _p2) = make_session();
        let (first_id, second_id) = (first.id, second.id);
        registry.insert(first).await.unwrap();
        registry.insert(second).await.unwrap();

        registry.claim_username(first_id, "bob", Role::Regular).await.unwrap();
        let result = registry.claim_username(second_id, "bob", Role::Regular).await;

        assert_eq!(result, Err(RegistryError::UsernameTaken("bob".to_string())));
        assert!(!registry.get(second_id).await.unwrap().authenticated);
    }

    #[tokio::test]
    async fn test_claim_username_allows_reclaiming_own_name() {
        let registry = make_registry();
        let (bob, _p) = make_session();
        let bob_id = bob.id;
        registry.insert(bob).await.unwrap();
        registry.claim_username(bob_id, "bob", Role::Regular).await.unwrap();

        let again = registry.claim_username(bob_id, "bob", Role::Regular).await;

        assert!(again.is_ok());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_claim_username_always_admits_admin() {
        let registry = make_registry();
        let (regular, _p1) = make_session();
        let (admin, _p2) = make_session();
        let (regular_id, admin_id) = (regular.id, admin.id);
        registry.insert(regular).await.unwrap();
        registry.insert(admin).await.unwrap();
        registry.claim_username(regular_id, "alice", Role::Regular).await.unwrap();

        assert!(registry.claim_username(admin_id, "alice", Role::Admin).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_closes_socket_once_and_is_idempotent() {
        // Arrange
        let registry = make_registry();
        let (session, mut peer) = make_session();
        let id = session.id;
        registry.insert(session).await.unwrap();
        let mut batch = ErrorBatch::new();

        // Act
        let first = registry.remove(id, &mut batch).await;
        let second = registry.remove(id, &mut batch).await;

        // Assert – the peer sees end-of-stream
        assert!(first);
        assert!(!second);
        let mut buf = [0u8; 8];
        assert_eq!(peer.read(&mut buf).await.unwrap(), 0);
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_inserts_yield_distinct_entries() {
        // Arrange
        const N: usize = 64;
        let registry = make_registry();
        let mut peers = Vec::new();
        let mut handles = Vec::new();

        // Act
        for _ in 0..N {
            let (session, peer) = make_session();
            peers.push(peer);
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move { registry.insert(session).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // Assert
        let ids: HashSet<ConnectionId> = registry.snapshot().await.iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), N);

        let victim = *ids.iter().next().unwrap();
        registry.remove(victim, &mut ErrorBatch::new()).await;
        let mut seen = Vec::new();
        registry.for_each(|s| seen.push(s.id)).await;
        let unique: HashSet<_> = seen.iter().copied().collect();
        assert_eq!(seen.len(), N - 1);
        assert_eq!(unique.len(), N - 1);
        assert!(!unique.contains(&victim));
    }

    #[tokio::test]
    async fn test_concurrent_removes_close_exactly_once() {
        let registry = make_registry();
        let (session, _peer) = make_session();
        let id = session.id;
        registry.insert(session).await.unwrap();

        let a = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.remove(id, &mut ErrorBatch::new()).await })
        };
        let b = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.remove(id, &mut ErrorBatch::new()).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|removed| **removed).count(), 1);
    }

    #[tokio::test]
    async fn test_remove_all_drains_registry() {
        let registry = make_registry();
        let mut peers = Vec::new();
        for _ in 0..3 {
            let (session, peer) = make_session();
            peers.push(peer);
            registry.insert(session).await.unwrap();
        }

        let removed = registry.remove_all(&mut ErrorBatch::new()).await;

        assert_eq!(removed, 3);
        assert!(registry.is_empty().await);
        for mut peer in peers {
            let mut buf = [0u8; 4];
            assert_eq!(peer.read(&mut buf).await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_send_frame_writes_wire_text() {
        let (session, mut peer) = make_session();
        let mut batch = ErrorBatch::new();

        session
            .send_frame(
                &ServerFrame::Relay {
                    sender: "bob".to_string(),
                    payload: "hi".to_string(),
                },
                &mut batch,
            )
            .await
            .unwrap();

        let mut buf = [0u8; 32];
        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"2:bob:hi");
    }
}
