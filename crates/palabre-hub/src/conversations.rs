//! Conversation store operations: creation (idempotent for direct pairs),
//! listings, membership management, and archiving.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use palabre_shared::types::{ConversationId, ConversationKind, NotificationKind, UserId};
use palabre_store::{Conversation, Message, Participant};

use crate::error::{HubError, Result};
use crate::hub::Hub;

/// A conversation annotated for the listing view: membership, last-message
/// preview, and the caller's unread count.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub participants: Vec<UserId>,
    pub last_message: Option<Message>,
    pub unread: u64,
}

impl Hub {
    /// Create a conversation for a deduplicated participant set (the
    /// creator is always included).
    ///
    /// For `direct` conversations the operation is idempotent per unordered
    /// pair: if a non-archived direct thread between the two users already
    /// exists, it is returned instead of a duplicate being created.
    pub async fn create_conversation(
        &self,
        creator: UserId,
        kind: ConversationKind,
        participant_ids: &[UserId],
        name: Option<String>,
    ) -> Result<Conversation> {
        let mut members: Vec<UserId> = Vec::with_capacity(participant_ids.len() + 1);
        members.push(creator);
        for &id in participant_ids {
            if !members.contains(&id) {
                members.push(id);
            }
        }

        let db = self.db.lock().await;

        if kind == ConversationKind::Direct {
            if members.len() != 2 {
                return Err(HubError::InvalidOperation(format!(
                    "a direct conversation needs exactly two participants, got {}",
                    members.len()
                )));
            }
            if let Some(existing) = db.find_active_direct_between(members[0], members[1])? {
                tracing::debug!(
                    conversation = %existing.id,
                    "direct thread already exists, returning it"
                );
                return Ok(existing);
            }
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: ConversationId::new(),
            kind,
            name: match kind {
                ConversationKind::Group => name,
                ConversationKind::Direct => None,
            },
            created_by: creator,
            archived: false,
            last_seq: 0,
            created_at: now,
            last_message_at: now,
        };
        db.create_conversation(&conversation)?;

        for &user_id in &members {
            db.add_participant(&Participant {
                conversation_id: conversation.id,
                user_id,
                joined_at: now,
                last_read_seq: None,
            })?;
        }

        tracing::info!(
            conversation = %conversation.id,
            kind = kind.as_str(),
            members = members.len(),
            "conversation created"
        );
        Ok(conversation)
    }

    /// The caller's conversations, most recent activity first, annotated
    /// with membership, preview, and unread count.
    pub async fn conversations_for_user(&self, user_id: UserId) -> Result<Vec<ConversationSummary>> {
        let db = self.db.lock().await;

        let conversations = db.list_conversations_for_user(user_id)?;
        let mut summaries = Vec::with_capacity(conversations.len());

        for conversation in conversations {
            let participants = db
                .list_participants(conversation.id)?
                .into_iter()
                .map(|p| p.user_id)
                .collect();
            let last_message = db.last_message_for(conversation.id)?;
            let marker = db.read_marker(conversation.id, user_id)?.unwrap_or(0);
            let unread = conversation.last_seq.saturating_sub(marker);

            summaries.push(ConversationSummary {
                conversation,
                participants,
                last_message,
                unread,
            });
        }

        Ok(summaries)
    }

    /// Fetch a conversation the actor participates in.
    pub async fn get_conversation(
        &self,
        actor: UserId,
        id: ConversationId,
    ) -> Result<Conversation> {
        let db = self.db.lock().await;
        let conversation = db.get_conversation(id)?;
        if !db.is_participant(id, actor)? {
            return Err(HubError::Forbidden(
                "not a participant of this conversation".into(),
            ));
        }
        Ok(conversation)
    }

    /// Add a user to a group conversation. Direct threads have a fixed
    /// pair of members.
    pub async fn add_participant(
        &self,
        actor: UserId,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<()> {
        let (conversation, inserted) = {
            let db = self.db.lock().await;
            let conversation = db.get_conversation(conversation_id)?;

            if conversation.kind == ConversationKind::Direct {
                return Err(HubError::InvalidOperation(
                    "cannot add a participant to a direct conversation".into(),
                ));
            }
            if !db.is_participant(conversation_id, actor)? {
                return Err(HubError::Forbidden(
                    "not a participant of this conversation".into(),
                ));
            }

            let inserted = db.add_participant(&Participant {
                conversation_id,
                user_id,
                joined_at: Utc::now(),
                last_read_seq: None,
            })?;
            (conversation, inserted)
        };

        if inserted {
            let group_name = conversation.name.as_deref().unwrap_or("a group");
            self.notify(
                user_id,
                NotificationKind::Invitation,
                "Added to a conversation".to_string(),
                format!("You were added to {group_name}"),
                Some(json!({ "conversation_id": conversation_id })),
            )
            .await?;
        }
        Ok(())
    }

    /// Remove a user from a group conversation. A participant may remove
    /// themself; only the creator may remove someone else.
    pub async fn remove_participant(
        &self,
        actor: UserId,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let conversation = db.get_conversation(conversation_id)?;

        if conversation.kind == ConversationKind::Direct {
            return Err(HubError::InvalidOperation(
                "cannot remove a participant from a direct conversation".into(),
            ));
        }
        if actor != user_id && actor != conversation.created_by {
            return Err(HubError::Forbidden(
                "only the creator may remove other participants".into(),
            ));
        }
        if !db.is_participant(conversation_id, actor)? {
            return Err(HubError::Forbidden(
                "not a participant of this conversation".into(),
            ));
        }

        if !db.remove_participant(conversation_id, user_id)? {
            return Err(HubError::NotFound);
        }
        Ok(())
    }

    /// Archive a conversation. Archived direct threads no longer block a
    /// fresh direct thread for the same pair.
    pub async fn archive_conversation(
        &self,
        actor: UserId,
        conversation_id: ConversationId,
    ) -> Result<()> {
        let db = self.db.lock().await;
        // Existence check first so an unknown id reports NotFound.
        db.get_conversation(conversation_id)?;
        if !db.is_participant(conversation_id, actor)? {
            return Err(HubError::Forbidden(
                "not a participant of this conversation".into(),
            ));
        }
        db.set_archived(conversation_id, true)?;
        tracing::info!(conversation = %conversation_id, "conversation archived");
        Ok(())
    }
}
