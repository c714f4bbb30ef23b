//! The [`Hub`] ties the persistent store, the delivery channel, and the
//! per-conversation/per-call coordination state together.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;

use palabre_shared::constants::DEFAULT_RING_TIMEOUT_SECS;
use palabre_shared::events::HubEvent;
use palabre_shared::types::{CallId, ConversationId, UserId};
use palabre_store::Database;

use crate::delivery::{ConnectionId, DeliveryChannel, Topic};
use crate::error::{HubError, Result};

/// Tuning knobs for the delivery core.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// How long a call may ring before the timer settles it as missed.
    pub ring_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            ring_timeout: Duration::from_secs(DEFAULT_RING_TIMEOUT_SECS),
        }
    }
}

/// The delivery core. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Hub {
    pub(crate) db: Arc<Mutex<Database>>,
    pub(crate) delivery: DeliveryChannel,
    /// One append lock per conversation: concurrent appends to the same
    /// conversation serialize here, different conversations never contend.
    /// Entries are evicted once the last holder releases its handle.
    pub(crate) append_locks: Arc<Mutex<HashMap<ConversationId, Arc<Mutex<()>>>>>,
    /// Ring-timeout timers for sessions still ringing, aborted on early
    /// accept/reject.
    pub(crate) ring_timers: Arc<Mutex<HashMap<CallId, AbortHandle>>>,
    pub(crate) config: Arc<HubConfig>,
}

impl Hub {
    pub fn new(db: Database, config: HubConfig) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            delivery: DeliveryChannel::new(),
            append_locks: Arc::new(Mutex::new(HashMap::new())),
            ring_timers: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(config),
        }
    }

    /// The delivery channel backing this hub.
    pub fn delivery(&self) -> &DeliveryChannel {
        &self.delivery
    }

    /// The append critical-section lock for one conversation.
    pub(crate) async fn append_lock_for(&self, id: ConversationId) -> Arc<Mutex<()>> {
        let mut locks = self.append_locks.lock().await;
        locks.entry(id).or_default().clone()
    }

    /// Return an append-lock handle and evict the map entry if no other
    /// append still holds or awaits it, so the map does not grow with one
    /// entry per conversation ever written to.
    pub(crate) async fn release_append_lock(&self, id: ConversationId, lock: Arc<Mutex<()>>) {
        drop(lock);
        let mut locks = self.append_locks.lock().await;
        if let Some(entry) = locks.get(&id) {
            // Strong count 1 means the map holds the only handle left; a
            // concurrent append_lock_for either cloned before this check
            // (count > 1) or recreates the entry afterwards.
            if Arc::strong_count(entry) == 1 {
                locks.remove(&id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Delivery-channel surface (with authorization)
    // ------------------------------------------------------------------

    /// Open a delivery connection for an authenticated user.
    pub async fn connect(
        &self,
        user_id: UserId,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<HubEvent>) {
        self.delivery.connect(user_id).await
    }

    /// Close a delivery connection, releasing its subscription set.
    /// In-flight mutations are unaffected; only pushes are dropped.
    pub async fn disconnect(&self, id: ConnectionId) {
        self.delivery.disconnect(id).await;
    }

    /// Subscribe a connection to a topic.
    ///
    /// A user may only subscribe to their own notification stream and to
    /// conversations they participate in.
    pub async fn subscribe(&self, connection: ConnectionId, topic: Topic) -> Result<()> {
        let actor = self
            .delivery
            .user_of(connection)
            .await
            .ok_or(HubError::NotFound)?;

        match topic {
            Topic::Notifications(user) if user != actor => {
                return Err(HubError::Forbidden(
                    "cannot subscribe to another user's notifications".into(),
                ));
            }
            Topic::Conversation(conversation_id) => {
                let db = self.db.lock().await;
                if !db.is_participant(conversation_id, actor)? {
                    return Err(HubError::Forbidden(
                        "not a participant of this conversation".into(),
                    ));
                }
            }
            _ => {}
        }

        if !self.delivery.subscribe(connection, topic).await {
            return Err(HubError::NotFound);
        }
        Ok(())
    }

    /// Drop one topic from a connection's subscription set.
    pub async fn unsubscribe(&self, connection: ConnectionId, topic: Topic) {
        self.delivery.unsubscribe(connection, topic).await;
    }
}
