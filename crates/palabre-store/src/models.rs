//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the API layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use palabre_shared::types::{
    Attachment, CallId, CallKind, CallState, ConversationId, ConversationKind, MessageId,
    NotificationId, NotificationKind, UserId,
};

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A thread of messages among a fixed set of participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    /// Unique conversation identifier.
    pub id: ConversationId,
    /// Direct (two-party) or group.
    pub kind: ConversationKind,
    /// Optional display name; groups only.
    pub name: Option<String>,
    /// User who created the conversation.
    pub created_by: UserId,
    /// Archived threads are hidden from listings and stop blocking
    /// direct-pair uniqueness.
    pub archived: bool,
    /// Last allocated message sequence number (0 when empty).
    pub last_seq: u64,
    /// When the conversation was created.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the latest message, denormalized for list sorting.
    pub last_message_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// A user's membership record in a conversation, carrying its read-state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
    /// Sequence number of the last message this user has read.
    /// `None` until the first `mark_read`.
    pub last_read_seq: Option<u64>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single message in a conversation's append-only log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// The conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// The sending participant.
    pub sender_id: UserId,
    /// Per-conversation sequence number, strictly increasing from 1.
    pub seq: u64,
    /// Text content; `None` for attachment-only messages.
    pub content: Option<String>,
    /// Reference to an already-uploaded blob, if any.
    pub attachment: Option<Attachment>,
    /// Optional reply reference to an earlier message in the same
    /// conversation.
    pub reply_to: Option<MessageId>,
    /// Server-side creation time.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Call session
// ---------------------------------------------------------------------------

/// Lifecycle record of one audio/video call attempt between two users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallSession {
    pub id: CallId,
    pub caller_id: UserId,
    pub receiver_id: UserId,
    pub kind: CallKind,
    pub state: CallState,
    /// When the session was created (ring start).
    pub created_at: DateTime<Utc>,
    /// When the call was accepted; distinct from `created_at` so ring
    /// duration can be derived later.
    pub started_at: Option<DateTime<Utc>>,
    /// When the session reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,
    /// Authoritative call duration, computed server-side on `end`.
    pub duration_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// A per-recipient notification row. Generated server-side only; external
/// push/SMS/email transports drain these rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    /// False -> true only; never reverts.
    pub read: bool,
    /// Structured deep-link payload (conversation id, call id, ...).
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
