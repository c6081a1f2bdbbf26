use crate::identity::Identity;
use crate::queue::{EnqueueOutcome, Frame, OutboundQueue};
use crate::subscription::{Subscription, SubscriptionId, SubscriptionScope};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use events::Event;
use log::*;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type Username = String;

/// Unique identifier for a connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Open = 0,
    /// No longer accepts frames; the writer is flushing what is queued.
    Draining = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Open,
            1 => ConnectionState::Draining,
            _ => ConnectionState::Closed,
        }
    }
}

/// One accepted client session.
///
/// Owned by the `ConnectionRegistry`; reader and writer tasks hold an `Arc`
/// only while the connection is live and stop when `cancelled()` fires.
pub struct Connection {
    id: ConnectionId,
    identity: Arc<Identity>,
    // Copy-on-write: the dispatcher clones the Arc and scans without holding
    // the lock, so a scan always sees a whole subscription list.
    subscriptions: RwLock<Arc<Vec<Subscription>>>,
    queue: OutboundQueue,
    state: AtomicU8,
    cancel: CancellationToken,
    connected_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        identity: Identity,
        queue_capacity: usize,
        max_consecutive_drops: usize,
    ) -> Self {
        Self {
            id,
            identity: Arc::new(identity),
            subscriptions: RwLock::new(Arc::new(Vec::new())),
            queue: OutboundQueue::new(queue_capacity, max_consecutive_drops),
            state: AtomicU8::new(ConnectionState::Open as u8),
            cancel: CancellationToken::new(),
            connected_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn username(&self) -> &str {
        &self.identity.username
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    /// Fires when the connection is closed; reader and writer select on it.
    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn subscriptions(&self) -> Arc<Vec<Subscription>> {
        self.subscriptions.read().clone()
    }

    /// Whether any subscription of this connection matches the event. Several
    /// matching subscriptions still mean a single delivery.
    pub fn wants(&self, event: &Event) -> bool {
        self.subscriptions()
            .iter()
            .any(|subscription| subscription.matches(&self.identity, event))
    }

    /// Non-blocking enqueue; frames targeting a connection that is no longer
    /// open are dropped.
    pub fn enqueue(&self, frame: Frame) -> EnqueueOutcome {
        if !self.is_open() {
            return EnqueueOutcome::Closed;
        }
        self.queue.push(frame)
    }

    fn add_subscription(&self, subscription: Subscription) {
        let mut guard = self.subscriptions.write();
        let mut updated = (**guard).clone();
        updated.push(subscription);
        *guard = Arc::new(updated);
    }

    fn remove_event_types(&self, event_types: &[String]) -> usize {
        let mut guard = self.subscriptions.write();
        let before = guard.len();

        let updated: Vec<Subscription> = if event_types.is_empty() {
            Vec::new()
        } else {
            guard
                .iter()
                .filter_map(|subscription| {
                    if subscription.event_types.is_empty() {
                        return Some(subscription.clone());
                    }
                    let remaining: Vec<String> = subscription
                        .event_types
                        .iter()
                        .filter(|event_type| !event_types.contains(event_type))
                        .cloned()
                        .collect();
                    // An emptied filter would mean "all types"; drop it instead.
                    if remaining.is_empty() {
                        None
                    } else {
                        Some(Subscription {
                            event_types: remaining,
                            ..subscription.clone()
                        })
                    }
                })
                .collect()
        };

        let removed = before - updated.len();
        *guard = Arc::new(updated);
        removed
    }

    /// Stop accepting new frames but let the writer flush what is queued.
    pub fn begin_draining(&self) -> bool {
        let drained = self
            .state
            .compare_exchange(
                ConnectionState::Open as u8,
                ConnectionState::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if drained {
            self.queue.close(false);
        }
        drained
    }

    /// Terminal transition: drops subscriptions and pending frames and cancels
    /// the reader and writer. Idempotent.
    pub(crate) fn mark_closed(&self) {
        let previous = self
            .state
            .swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        if previous == ConnectionState::Closed as u8 {
            return;
        }

        *self.subscriptions.write() = Arc::new(Vec::new());
        self.queue.close(true);
        self.cancel.cancel();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("username", &self.identity.username)
            .field("state", &self.state())
            .field("subscriptions", &self.subscriptions().len())
            .field("queued", &self.queue.len())
            .finish()
    }
}

/// Process-wide connection table with dual indices for O(1) lookups.
///
/// Backed by sharded `DashMap`s so dispatcher scans, subscription changes and
/// connect/disconnect traffic do not serialize on a single lock. No operation
/// here fails: unknown ids are no-ops.
pub struct ConnectionRegistry {
    /// Primary storage: lookup by connection_id for registration/cleanup - O(1)
    connections: DashMap<ConnectionId, Arc<Connection>>,

    /// Secondary index: connections per user, for force-disconnects - O(1)
    user_index: DashMap<Username, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            user_index: DashMap::new(),
        }
    }

    /// Register a connection. Registering an id that is already present
    /// replaces (and closes) the previous entry, treated as a reconnect.
    pub fn register(&self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        let connection_id = connection.id().clone();
        let username = connection.username().to_string();

        let replaced = self
            .connections
            .insert(connection_id.clone(), Arc::clone(&connection));

        if let Some(previous) = &replaced {
            warn!(
                "Connection {} registered twice, replacing previous entry for {}",
                connection_id,
                previous.username()
            );
            previous.mark_closed();
            self.remove_from_user_index(previous.username(), &connection_id);
        }

        self.user_index
            .entry(username)
            .or_default()
            .insert(connection_id);

        replaced
    }

    /// Unregister a connection and close it. Unknown ids are a no-op.
    pub fn unregister(&self, connection_id: &ConnectionId) -> Option<Arc<Connection>> {
        let (_, connection) = self.connections.remove(connection_id)?;
        connection.mark_closed();
        self.remove_from_user_index(connection.username(), connection_id);
        Some(connection)
    }

    /// Unregister this exact connection. The entry under its id is removed
    /// only if it still holds `connection`, so cleanup from a replaced
    /// connection never evicts its reconnect. The connection is closed either
    /// way. Returns whether an entry was removed.
    pub fn unregister_connection(&self, connection: &Arc<Connection>) -> bool {
        connection.mark_closed();
        let removed = self
            .connections
            .remove_if(connection.id(), |_, current| Arc::ptr_eq(current, connection))
            .is_some();
        if removed {
            self.remove_from_user_index(connection.username(), connection.id());
        }
        removed
    }

    fn remove_from_user_index(&self, username: &str, connection_id: &ConnectionId) {
        if let Some(mut entry) = self.user_index.get_mut(username) {
            entry.remove(connection_id);

            // Clean up empty user entries
            if entry.is_empty() {
                drop(entry); // Release lock before removal
                self.user_index
                    .remove_if(username, |_, connections| connections.is_empty());
            }
        }
    }

    pub fn subscribe(
        &self,
        connection_id: &ConnectionId,
        event_types: Vec<String>,
        scopes: Vec<SubscriptionScope>,
    ) -> Option<SubscriptionId> {
        let connection = self.get(connection_id)?;
        if !connection.is_open() {
            return None;
        }

        let subscription = Subscription::new(event_types, scopes);
        let subscription_id = subscription.id;
        connection.add_subscription(subscription);
        Some(subscription_id)
    }

    /// Remove the listed event types from every subscription of the
    /// connection; an empty list removes all subscriptions. Returns the number
    /// of subscriptions that went away.
    pub fn unsubscribe(&self, connection_id: &ConnectionId, event_types: &[String]) -> usize {
        match self.get(connection_id) {
            Some(connection) => connection.remove_event_types(event_types),
            None => 0,
        }
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections
            .get(connection_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Open connections at the time of the call. Shard locks are held only
    /// while cloning the `Arc`s; matching happens afterwards, lock-free.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|entry| entry.value().is_open())
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Every registered connection, regardless of state.
    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn connections_for_user(&self, username: &str) -> Vec<ConnectionId> {
        self.user_index
            .get(username)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Grant;
    use events::{PermissionLevel, ScopeType};

    fn connection(id: &str, username: &str) -> Arc<Connection> {
        Arc::new(Connection::new(
            ConnectionId::from(id),
            Identity::new(
                username,
                vec![Grant::new(ScopeType::Project, "P1", PermissionLevel::Read)],
            ),
            8,
            4,
        ))
    }

    #[test]
    fn register_and_unregister() {
        let registry = ConnectionRegistry::new();
        let conn = connection("c1", "alice");

        assert!(registry.register(Arc::clone(&conn)).is_none());
        assert!(registry.contains(conn.id()));
        assert_eq!(registry.connections_for_user("alice"), vec![conn.id().clone()]);

        let removed = registry.unregister(conn.id()).unwrap();
        assert_eq!(removed.state(), ConnectionState::Closed);
        assert!(registry.is_empty());
        assert!(registry.connections_for_user("alice").is_empty());
    }

    #[test]
    fn unregister_unknown_id_is_a_no_op() {
        let registry = ConnectionRegistry::new();
        assert!(registry.unregister(&ConnectionId::from("missing")).is_none());
    }

    #[test]
    fn duplicate_register_replaces_and_closes_previous() {
        let registry = ConnectionRegistry::new();
        let first = connection("c1", "alice");
        let second = connection("c1", "alice");

        registry.register(Arc::clone(&first));
        let replaced = registry.register(Arc::clone(&second)).unwrap();

        assert!(Arc::ptr_eq(&replaced, &first));
        assert_eq!(first.state(), ConnectionState::Closed);
        assert!(second.is_open());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.connections_for_user("alice").len(), 1);
    }

    #[test]
    fn stale_connection_cleanup_keeps_reconnect() {
        let registry = ConnectionRegistry::new();
        let first = connection("c1", "alice");
        let second = connection("c1", "alice");
        registry.register(Arc::clone(&first));
        registry.register(Arc::clone(&second));

        assert!(!registry.unregister_connection(&first));
        assert!(second.is_open());
        assert!(registry.contains(second.id()));
        assert_eq!(registry.connections_for_user("alice"), vec![second.id().clone()]);

        assert!(registry.unregister_connection(&second));
        assert_eq!(second.state(), ConnectionState::Closed);
        assert!(registry.is_empty());
        assert!(registry.connections_for_user("alice").is_empty());
    }

    #[test]
    fn unsubscribe_removes_listed_types_only() {
        let registry = ConnectionRegistry::new();
        let conn = connection("c1", "alice");
        registry.register(Arc::clone(&conn));

        registry.subscribe(
            conn.id(),
            vec!["ticket.created".to_string(), "comment.*".to_string()],
            vec![],
        );
        registry.subscribe(conn.id(), vec!["ticket.created".to_string()], vec![]);

        let removed = registry.unsubscribe(conn.id(), &["ticket.created".to_string()]);
        assert_eq!(removed, 1);

        let subscriptions = conn.subscriptions();
        assert_eq!(subscriptions.len(), 1);
        assert_eq!(subscriptions[0].event_types, vec!["comment.*".to_string()]);
    }

    #[test]
    fn unsubscribe_without_types_removes_everything() {
        let registry = ConnectionRegistry::new();
        let conn = connection("c1", "alice");
        registry.register(Arc::clone(&conn));
        registry.subscribe(conn.id(), vec![], vec![]);
        registry.subscribe(conn.id(), vec!["ticket".to_string()], vec![]);

        assert_eq!(registry.unsubscribe(conn.id(), &[]), 2);
        assert!(conn.subscriptions().is_empty());
    }

    #[test]
    fn closed_connection_has_no_subscriptions_and_rejects_frames() {
        let registry = ConnectionRegistry::new();
        let conn = connection("c1", "alice");
        registry.register(Arc::clone(&conn));
        registry.subscribe(conn.id(), vec![], vec![]);

        registry.unregister(conn.id());

        assert!(conn.subscriptions().is_empty());
        assert_eq!(conn.enqueue(Arc::from("late")), EnqueueOutcome::Closed);
        assert!(registry.subscribe(conn.id(), vec![], vec![]).is_none());
    }

    #[test]
    fn snapshot_skips_draining_connections() {
        let registry = ConnectionRegistry::new();
        let open = connection("c1", "alice");
        let draining = connection("c2", "bob");
        registry.register(Arc::clone(&open));
        registry.register(Arc::clone(&draining));

        assert!(draining.begin_draining());

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id(), open.id());
        assert_eq!(registry.all().len(), 2);
    }
}
