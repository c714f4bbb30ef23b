//! Event payloads pushed to subscribed clients over the delivery channel.
//!
//! Every frame on the wire is one [`HubEvent`] serialized as JSON. Within a
//! single conversation topic, `MessageAppended` frames are pushed in
//! non-decreasing `seq` order; a reconnecting client reconciles by fetching
//! messages with `seq` greater than the last one it saw.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    Attachment, CallId, CallKind, CallState, ConversationId, MessageId, NotificationId,
    NotificationKind, UserId,
};

/// All events that can be pushed over a delivery-channel subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum HubEvent {
    /// A message was appended to a conversation the client subscribes to.
    MessageAppended(MessageEvent),

    /// A call session the client is party to changed state.
    CallStateChanged(CallEvent),

    /// A notification row was created for the client's user.
    NotificationCreated(NotificationEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageEvent {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    /// Per-conversation sequence number, strictly increasing from 1.
    pub seq: u64,
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallEvent {
    pub id: CallId,
    pub caller_id: UserId,
    pub receiver_id: UserId,
    pub kind: CallKind,
    pub state: CallState,
    /// `None` when the event announces session creation (ring start).
    pub previous_state: Option<CallState>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationEvent {
    pub id: NotificationId,
    pub recipient_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    /// Deep-link payload: conversation id, call id, etc.
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
