//! The delivery channel: a registry of per-connection subscription sets and
//! the push path that fans events out to them.
//!
//! Each connected client owns one [`ConnectionId`] and an event receiver.
//! Subscriptions are explicit (topic by topic) and the whole set is dropped
//! on disconnect; there is no ambient per-module subscription state.
//!
//! Pushes are at-least-once across a reconnect boundary: a client that
//! drops and reconnects must reconcile with a `messages_since` backfill.
//! Within one live subscription, message events for a conversation arrive
//! in non-decreasing sequence order because the publisher holds that
//! conversation's append lock while pushing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use palabre_shared::events::HubEvent;
use palabre_shared::types::{ConversationId, UserId};

/// Identifier of one client connection. A user may hold several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A subscribable event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Live message stream of one conversation.
    Conversation(ConversationId),
    /// A user's personal notification stream.
    Notifications(UserId),
}

impl Topic {
    /// Parse the wire form: `conversation:<uuid>` or `notifications:<uuid>`.
    pub fn parse(s: &str) -> Option<Self> {
        let (prefix, id) = s.split_once(':')?;
        let uuid = Uuid::parse_str(id).ok()?;
        match prefix {
            "conversation" => Some(Self::Conversation(ConversationId(uuid))),
            "notifications" => Some(Self::Notifications(UserId(uuid))),
            _ => None,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conversation(id) => write!(f, "{}", id.to_topic()),
            Self::Notifications(user) => write!(f, "{}", user.notification_topic()),
        }
    }
}

struct ClientConnection {
    user_id: UserId,
    tx: mpsc::UnboundedSender<HubEvent>,
    topics: HashSet<Topic>,
}

/// Shared subscription registry. Cheap to clone; all clones share state.
#[derive(Clone, Default)]
pub struct DeliveryChannel {
    connections: Arc<Mutex<HashMap<ConnectionId, ClientConnection>>>,
}

impl DeliveryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for an authenticated user. Returns the
    /// connection id and the receiving end of its event stream.
    pub async fn connect(
        &self,
        user_id: UserId,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<HubEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ConnectionId::new();

        let mut connections = self.connections.lock().await;
        connections.insert(
            id,
            ClientConnection {
                user_id,
                tx,
                topics: HashSet::new(),
            },
        );

        tracing::debug!(connection = %id, user = %user_id, "delivery connection opened");
        (id, rx)
    }

    /// Drop a connection and its entire subscription set.
    pub async fn disconnect(&self, id: ConnectionId) {
        let mut connections = self.connections.lock().await;
        if connections.remove(&id).is_some() {
            tracing::debug!(connection = %id, "delivery connection closed");
        }
    }

    /// Add a topic to a connection's subscription set. Returns `false` if
    /// the connection is unknown (already disconnected).
    pub async fn subscribe(&self, id: ConnectionId, topic: Topic) -> bool {
        let mut connections = self.connections.lock().await;
        match connections.get_mut(&id) {
            Some(conn) => {
                conn.topics.insert(topic);
                true
            }
            None => false,
        }
    }

    /// Remove a topic from a connection's subscription set.
    pub async fn unsubscribe(&self, id: ConnectionId, topic: Topic) {
        let mut connections = self.connections.lock().await;
        if let Some(conn) = connections.get_mut(&id) {
            conn.topics.remove(&topic);
        }
    }

    /// The user a connection belongs to, if it is still registered.
    pub async fn user_of(&self, id: ConnectionId) -> Option<UserId> {
        let connections = self.connections.lock().await;
        connections.get(&id).map(|c| c.user_id)
    }

    /// Push an event to every connection subscribed to `topic`.
    ///
    /// A send failure means the receiver was dropped mid-disconnect; the
    /// push for that connection is silently lost, to be recovered by the
    /// client's reconciliation fetch.
    pub async fn publish(&self, topic: Topic, event: &HubEvent) {
        let connections = self.connections.lock().await;
        for (id, conn) in connections.iter() {
            if conn.topics.contains(&topic) && conn.tx.send(event.clone()).is_err() {
                tracing::debug!(connection = %id, %topic, "dropping push to closed connection");
            }
        }
    }

    /// Whether `user` has at least one live subscription to `topic`.
    ///
    /// This is the fan-out suppression question: a participant actively
    /// viewing a conversation gets the live push but no notification row.
    pub async fn is_subscribed(&self, user_id: UserId, topic: Topic) -> bool {
        let connections = self.connections.lock().await;
        connections
            .values()
            .any(|c| c.user_id == user_id && c.topics.contains(&topic))
    }
}
