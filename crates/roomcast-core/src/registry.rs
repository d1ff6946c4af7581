//! Session registry: the connection state machine and room membership.
//!
//! One registry instance owns every live session. State moves through
//! `Unauthenticated → Authenticated → Joined(room) → Joined(other) →
//! Disconnected`; authentication happens once per connection, and a
//! connection belongs to at most one room at a time.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use roomcast_protocol::ServerEvent;

use crate::auth::{AuthError, Identity, TokenVerifier};
use crate::dispatch::{Dispatcher, OutboundSender};
use crate::error::SessionError;
use crate::ledger::{validate_text, MessageLedger, StoredMessage, DEFAULT_HISTORY_LIMIT};
use crate::room::{validate_room_name, RoomDirectory};

/// Unique identifier for a live connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Number of messages returned by the history read on join.
    pub history_limit: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Per-connection session state. Owned exclusively by the registry.
#[derive(Debug)]
struct Session {
    identity: Identity,
    /// Current room, absent until a join succeeds.
    room: Option<String>,
    outbound: OutboundSender,
}

/// The session registry.
///
/// Holds the session table and the broadcast dispatcher, and coordinates
/// the token verifier, room directory, and message ledger. All state is
/// owned here and injected where needed, never reached through globals.
pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, Session>,
    dispatcher: Dispatcher,
    verifier: Arc<dyn TokenVerifier>,
    directory: Arc<dyn RoomDirectory>,
    ledger: Arc<dyn MessageLedger>,
    config: RegistryConfig,
}

impl SessionRegistry {
    /// Create a registry with default configuration.
    #[must_use]
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        directory: Arc<dyn RoomDirectory>,
        ledger: Arc<dyn MessageLedger>,
    ) -> Self {
        Self::with_config(verifier, directory, ledger, RegistryConfig::default())
    }

    /// Create a registry with custom configuration.
    #[must_use]
    pub fn with_config(
        verifier: Arc<dyn TokenVerifier>,
        directory: Arc<dyn RoomDirectory>,
        ledger: Arc<dyn MessageLedger>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            dispatcher: Dispatcher::new(),
            verifier,
            directory,
            ledger,
            config,
        }
    }

    /// Authenticate a new connection.
    ///
    /// Runs the token verifier once; on success the session record is
    /// created in the `Authenticated` state with `outbound` as its
    /// delivery handle.
    ///
    /// # Errors
    ///
    /// Returns the specific [`AuthError`] on failure; no partial session
    /// is retained and the caller must terminate the connection.
    pub async fn authenticate(
        &self,
        connection: ConnectionId,
        token: Option<&str>,
        outbound: OutboundSender,
    ) -> Result<Identity, AuthError> {
        let token = token.ok_or(AuthError::MissingToken)?;
        let identity = self.verifier.verify(token).await?;

        info!(connection = %connection, user = %identity.user_id, "Session authenticated");
        self.sessions.insert(
            connection,
            Session {
                identity: identity.clone(),
                room: None,
                outbound,
            },
        );
        Ok(identity)
    }

    /// Join a room, releasing the current membership if any.
    ///
    /// Returns the room's recent history, oldest first. The room's other
    /// subscribers are notified that a new participant joined.
    ///
    /// # Errors
    ///
    /// Fails with `RoomNotFound` if the directory does not know the room,
    /// leaving any prior membership unchanged; likewise for validation and
    /// storage failures. All fallible work happens before the membership
    /// swap, so an error never strands the session between rooms.
    pub async fn join(
        &self,
        connection: &ConnectionId,
        room: &str,
    ) -> Result<Vec<StoredMessage>, SessionError> {
        validate_room_name(room).map_err(SessionError::InvalidRoomName)?;
        if !self.sessions.contains_key(connection) {
            return Err(SessionError::UnknownConnection);
        }

        if !self.directory.exists(room).await? {
            return Err(SessionError::RoomNotFound(room.to_string()));
        }
        let history = self
            .ledger
            .recent(room, self.config.history_limit, 0)
            .await?;

        let (identity, previous, outbound) = {
            let mut session = self
                .sessions
                .get_mut(connection)
                .ok_or(SessionError::UnknownConnection)?;
            if session.room.as_deref() == Some(room) {
                // Rejoining the current room only refreshes history.
                return Ok(history);
            }
            let previous = session.room.replace(room.to_string());
            (
                session.identity.clone(),
                previous,
                session.outbound.clone(),
            )
        };

        if let Some(previous) = previous {
            self.dispatcher.unsubscribe(&previous, connection);
        }
        self.dispatcher.subscribe(room, connection.clone(), outbound);
        debug!(connection = %connection, room = %room, user = %identity.user_id, "Joined room");

        self.dispatcher.publish_except(
            room,
            connection,
            &ServerEvent::participant_joined(room, &identity.user_id, &identity.display_name),
        );

        Ok(history)
    }

    /// Leave a room. A no-op if not currently joined to it; idempotent.
    pub fn leave(&self, connection: &ConnectionId, room: &str) {
        let Some(mut session) = self.sessions.get_mut(connection) else {
            return;
        };
        if session.room.as_deref() != Some(room) {
            return;
        }
        session.room = None;
        drop(session);

        self.dispatcher.unsubscribe(room, connection);
        debug!(connection = %connection, room = %room, "Left room");
    }

    /// Send a message to a room the connection is currently joined to.
    ///
    /// The message is appended to the ledger, then fanned out to every
    /// current subscriber of the room, including the sender.
    ///
    /// # Errors
    ///
    /// Membership is authoritative at the moment the send is processed: a
    /// send that lost the race against a leave fails with `NotAMember` and
    /// never reaches the ledger.
    pub async fn send(
        &self,
        connection: &ConnectionId,
        room: &str,
        text: &str,
    ) -> Result<StoredMessage, SessionError> {
        let text = validate_text(text).map_err(SessionError::InvalidText)?;

        let identity = {
            let session = self
                .sessions
                .get(connection)
                .ok_or(SessionError::UnknownConnection)?;
            if session.room.as_deref() != Some(room) {
                return Err(SessionError::NotAMember(room.to_string()));
            }
            session.identity.clone()
        };

        let message = self.ledger.append(room, &identity, text).await?;

        // Publish strictly after the append returns, so persisted history
        // and live broadcast never diverge in content.
        let recipients = self
            .dispatcher
            .publish(room, &ServerEvent::delivered((&message).into()));
        debug!(connection = %connection, room = %room, recipients, "Message delivered");

        Ok(message)
    }

    /// Remove a session and its membership. Terminal for the connection.
    ///
    /// A message already accepted for append completes normally, but no
    /// further operations on this connection succeed.
    pub fn disconnect(&self, connection: &ConnectionId) {
        let Some((_, session)) = self.sessions.remove(connection) else {
            return;
        };
        if let Some(room) = &session.room {
            self.dispatcher.unsubscribe(room, connection);
        }
        info!(connection = %connection, user = %session.identity.user_id, "Session disconnected");
    }

    /// The room this connection is currently joined to, if any.
    #[must_use]
    pub fn current_room(&self, connection: &ConnectionId) -> Option<String> {
        self.sessions
            .get(connection)
            .and_then(|session| session.room.clone())
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of subscribers currently in a room.
    #[must_use]
    pub fn subscriber_count(&self, room: &str) -> usize {
        self.dispatcher.subscriber_count(room)
    }

    /// Number of rooms with at least one subscriber.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.dispatcher.room_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::JwtVerifier;
    use crate::error::StorageError;
    use crate::ledger::InMemoryMessageLedger;
    use crate::room::InMemoryRoomDirectory;
    use async_trait::async_trait;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;
    use std::time::{SystemTime, UNIX_EPOCH};
    use tokio::sync::mpsc;
    use tokio::sync::mpsc::error::TryRecvError;

    const SECRET: &[u8] = b"test-secret";

    #[derive(Serialize)]
    struct TestClaims<'a> {
        sub: &'a str,
        name: &'a str,
        exp: i64,
    }

    fn token_for(user: &str) -> String {
        let exp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
            + 3600;
        encode(
            &Header::default(),
            &TestClaims {
                sub: user,
                name: user,
                exp,
            },
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    fn registry_with_rooms(rooms: &[&str]) -> SessionRegistry {
        SessionRegistry::new(
            Arc::new(JwtVerifier::new(SECRET)),
            Arc::new(InMemoryRoomDirectory::with_rooms(rooms.iter().copied())),
            Arc::new(InMemoryMessageLedger::new()),
        )
    }

    async fn connect(
        registry: &SessionRegistry,
        user: &str,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let connection = ConnectionId::generate();
        let (tx, rx) = mpsc::unbounded_channel();
        registry
            .authenticate(connection.clone(), Some(&token_for(user)), tx)
            .await
            .unwrap();
        (connection, rx)
    }

    struct FailingDirectory;

    #[async_trait]
    impl RoomDirectory for FailingDirectory {
        async fn exists(&self, _room: &str) -> Result<bool, StorageError> {
            Err(StorageError::new("directory offline"))
        }
    }

    struct FailingLedger;

    #[async_trait]
    impl MessageLedger for FailingLedger {
        async fn append(
            &self,
            _room: &str,
            _author: &Identity,
            _text: &str,
        ) -> Result<StoredMessage, StorageError> {
            Err(StorageError::new("ledger offline"))
        }

        async fn recent(
            &self,
            _room: &str,
            _limit: usize,
            _offset: usize,
        ) -> Result<Vec<StoredMessage>, StorageError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_authenticate_yields_token_identity() {
        let registry = registry_with_rooms(&[]);
        let (tx, _rx) = mpsc::unbounded_channel();

        let identity = registry
            .authenticate(ConnectionId::generate(), Some(&token_for("alice")), tx)
            .await
            .unwrap();
        assert_eq!(identity.user_id, "alice");
        assert_eq!(registry.session_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_authentication_retains_no_session() {
        let registry = registry_with_rooms(&[]);

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = registry
            .authenticate(ConnectionId::generate(), Some("garbage"), tx)
            .await;
        assert!(matches!(result, Err(AuthError::Malformed(_))));

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = registry.authenticate(ConnectionId::generate(), None, tx).await;
        assert!(matches!(result, Err(AuthError::MissingToken)));

        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test]
    async fn test_join_returns_history_oldest_first() {
        let registry = registry_with_rooms(&["general"]);
        let (alice, _rx_a) = connect(&registry, "alice").await;

        let history = registry.join(&alice, "general").await.unwrap();
        assert!(history.is_empty());

        registry.send(&alice, "general", "one").await.unwrap();
        registry.send(&alice, "general", "two").await.unwrap();

        // A fresh connection sees the persisted history on join.
        let (bob, _rx_b) = connect(&registry, "bob").await;
        let history = registry.join(&bob, "general").await.unwrap();
        let texts: Vec<&str> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["one", "two"]);
    }

    #[tokio::test]
    async fn test_join_missing_room_keeps_membership() {
        let registry = registry_with_rooms(&["general"]);
        let (alice, _rx) = connect(&registry, "alice").await;
        registry.join(&alice, "general").await.unwrap();

        let result = registry.join(&alice, "ghost-room").await;
        assert!(matches!(result, Err(SessionError::RoomNotFound(_))));
        assert_eq!(registry.current_room(&alice).as_deref(), Some("general"));
        assert_eq!(registry.subscriber_count("general"), 1);
    }

    #[tokio::test]
    async fn test_join_rejects_bad_room_names() {
        let registry = registry_with_rooms(&["general"]);
        let (alice, _rx) = connect(&registry, "alice").await;

        for name in ["", "no spaces", "général", &"x".repeat(51)] {
            assert!(matches!(
                registry.join(&alice, name).await,
                Err(SessionError::InvalidRoomName(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_join_releases_previous_room() {
        let registry = registry_with_rooms(&["general", "random"]);
        let (alice, _rx) = connect(&registry, "alice").await;

        registry.join(&alice, "general").await.unwrap();
        registry.join(&alice, "random").await.unwrap();

        assert_eq!(registry.current_room(&alice).as_deref(), Some("random"));
        assert_eq!(registry.subscriber_count("general"), 0);
        assert_eq!(registry.subscriber_count("random"), 1);
    }

    #[tokio::test]
    async fn test_join_notifies_other_participants() {
        let registry = registry_with_rooms(&["general"]);
        let (alice, mut rx_a) = connect(&registry, "alice").await;
        let (bob, _rx_b) = connect(&registry, "bob").await;

        registry.join(&alice, "general").await.unwrap();
        registry.join(&bob, "general").await.unwrap();

        match rx_a.try_recv().unwrap() {
            ServerEvent::ParticipantJoined { room, user_id, .. } => {
                assert_eq!(room, "general");
                assert_eq!(user_id, "bob");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_requires_membership() {
        let registry = registry_with_rooms(&["general", "other-room"]);
        let (alice, _rx) = connect(&registry, "alice").await;
        registry.join(&alice, "general").await.unwrap();

        // The room exists, but Alice is not subscribed to it.
        let result = registry.send(&alice, "other-room", "hi").await;
        assert!(matches!(result, Err(SessionError::NotAMember(_))));

        // The rejected send never reached the ledger.
        let (bob, _rx_b) = connect(&registry, "bob").await;
        let history = registry.join(&bob, "other-room").await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_send_broadcasts_to_all_subscribers() {
        let registry = registry_with_rooms(&["general"]);
        let (alice, mut rx_a) = connect(&registry, "alice").await;
        let (bob, mut rx_b) = connect(&registry, "bob").await;
        registry.join(&alice, "general").await.unwrap();
        registry.join(&bob, "general").await.unwrap();
        let _ = rx_a.try_recv(); // drain bob's join notification

        let message = registry.send(&alice, "general", "hello").await.unwrap();
        assert_eq!(message.author.user_id, "alice");

        // Delivery includes the sender.
        for rx in [&mut rx_a, &mut rx_b] {
            match rx.try_recv().unwrap() {
                ServerEvent::Delivered { room, message } => {
                    assert_eq!(room, "general");
                    assert_eq!(message.text, "hello");
                    assert_eq!(message.author_id, "alice");
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_send_validates_text() {
        let registry = registry_with_rooms(&["general"]);
        let (alice, _rx) = connect(&registry, "alice").await;
        registry.join(&alice, "general").await.unwrap();

        assert!(matches!(
            registry.send(&alice, "general", "   ").await,
            Err(SessionError::InvalidText(_))
        ));
        assert!(matches!(
            registry.send(&alice, "general", &"x".repeat(1001)).await,
            Err(SessionError::InvalidText(_))
        ));

        // Surrounding whitespace is trimmed before the bound applies.
        let message = registry.send(&alice, "general", "  hi  ").await.unwrap();
        assert_eq!(message.text, "hi");
    }

    #[tokio::test]
    async fn test_send_after_leave_is_rejected() {
        let registry = registry_with_rooms(&["general"]);
        let (alice, _rx) = connect(&registry, "alice").await;
        registry.join(&alice, "general").await.unwrap();
        registry.leave(&alice, "general");

        // Membership is evaluated when the send is processed, so the send
        // that lost the race against the leave is rejected.
        assert!(matches!(
            registry.send(&alice, "general", "too late").await,
            Err(SessionError::NotAMember(_))
        ));
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let registry = registry_with_rooms(&["general"]);
        let (alice, _rx) = connect(&registry, "alice").await;
        registry.join(&alice, "general").await.unwrap();

        registry.leave(&alice, "general");
        registry.leave(&alice, "general");
        registry.leave(&alice, "never-joined");

        assert_eq!(registry.current_room(&alice), None);
    }

    #[tokio::test]
    async fn test_disconnect_removes_membership() {
        let registry = registry_with_rooms(&["general"]);
        let (alice, _rx_a) = connect(&registry, "alice").await;
        let (bob, mut rx_b) = connect(&registry, "bob").await;
        registry.join(&alice, "general").await.unwrap();
        registry.join(&bob, "general").await.unwrap();

        registry.disconnect(&bob);
        assert_eq!(registry.session_count(), 1);
        assert_eq!(registry.subscriber_count("general"), 1);

        registry.send(&alice, "general", "anyone there?").await.unwrap();

        // Every sender for Bob's queue is gone, so nothing was delivered.
        while let Ok(event) = rx_b.try_recv() {
            assert!(!matches!(event, ServerEvent::Delivered { .. }));
        }
        assert!(matches!(rx_b.try_recv(), Err(TryRecvError::Disconnected)));

        // Operations on the dead connection fail.
        assert!(matches!(
            registry.send(&bob, "general", "ghost").await,
            Err(SessionError::UnknownConnection)
        ));
    }

    #[tokio::test]
    async fn test_directory_failure_surfaces_as_storage() {
        let registry = SessionRegistry::new(
            Arc::new(JwtVerifier::new(SECRET)),
            Arc::new(FailingDirectory),
            Arc::new(InMemoryMessageLedger::new()),
        );
        let (alice, _rx) = connect(&registry, "alice").await;

        let result = registry.join(&alice, "general").await;
        assert!(matches!(result, Err(SessionError::Storage(_))));
        assert_eq!(registry.current_room(&alice), None);
    }

    #[tokio::test]
    async fn test_ledger_failure_leaves_session_intact() {
        let registry = SessionRegistry::new(
            Arc::new(JwtVerifier::new(SECRET)),
            Arc::new(InMemoryRoomDirectory::with_rooms(["general"])),
            Arc::new(FailingLedger),
        );
        let (alice, mut rx) = connect(&registry, "alice").await;
        registry.join(&alice, "general").await.unwrap();

        let result = registry.send(&alice, "general", "hello").await;
        assert!(matches!(result, Err(SessionError::Storage(_))));

        // Nothing was broadcast and the membership survives the failure.
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.current_room(&alice).as_deref(), Some("general"));
    }
}
