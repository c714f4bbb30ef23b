//! Notification fan-out and the notification read surface.
//!
//! Fan-out derives per-recipient rows from message appends and call
//! transitions. Rows are only ever written here, server-side; external
//! push/SMS/email transports drain them later, and the delivery channel
//! pushes a live `NotificationCreated` event to the recipient's personal
//! stream at creation time.

use chrono::Utc;
use serde_json::json;

use palabre_shared::events::{HubEvent, NotificationEvent};
use palabre_shared::types::{NotificationId, NotificationKind, UserId};
use palabre_store::{Message, Notification};

use crate::delivery::Topic;
use crate::error::{HubError, Result};
use crate::hub::Hub;

/// Preview length used in notification bodies.
const PREVIEW_CHARS: usize = 120;

impl Hub {
    /// Create notification rows for a freshly appended message.
    ///
    /// Every participant except the sender gets a `new_message` row unless
    /// they are actively viewing the conversation (holding a live
    /// subscription to its topic) — those only get the live push.
    /// Explicitly mentioned participants get a `mention` row that bypasses
    /// the active-viewer suppression.
    pub(crate) async fn fan_out_message(
        &self,
        message: &Message,
        mentions: &[UserId],
    ) -> Result<()> {
        let participants = {
            let db = self.db.lock().await;
            db.list_participants(message.conversation_id)?
        };

        let topic = Topic::Conversation(message.conversation_id);
        let body = preview(message);
        let payload = json!({
            "conversation_id": message.conversation_id,
            "message_id": message.id,
            "seq": message.seq,
        });

        for participant in participants {
            let recipient = participant.user_id;
            if recipient == message.sender_id {
                continue;
            }

            let kind = if mentions.contains(&recipient) {
                NotificationKind::Mention
            } else {
                if self.delivery.is_subscribed(recipient, topic).await {
                    // Actively viewing: the live push suffices.
                    continue;
                }
                NotificationKind::NewMessage
            };

            self.notify(
                recipient,
                kind,
                title_for(kind).to_string(),
                body.clone(),
                Some(payload.clone()),
            )
            .await?;
        }

        Ok(())
    }

    /// Insert a notification row and push it on the recipient's personal
    /// stream.
    pub(crate) async fn notify(
        &self,
        recipient_id: UserId,
        kind: NotificationKind,
        title: String,
        body: String,
        payload: Option<serde_json::Value>,
    ) -> Result<()> {
        let notification = Notification {
            id: NotificationId::new(),
            recipient_id,
            kind,
            title,
            body,
            read: false,
            payload,
            created_at: Utc::now(),
        };

        {
            let db = self.db.lock().await;
            db.insert_notification(&notification)?;
        }

        self.delivery
            .publish(
                Topic::Notifications(recipient_id),
                &HubEvent::NotificationCreated(NotificationEvent {
                    id: notification.id,
                    recipient_id,
                    kind,
                    title: notification.title,
                    body: notification.body,
                    payload: notification.payload,
                    created_at: notification.created_at,
                }),
            )
            .await;

        Ok(())
    }

    /// Unread notifications for a user, newest first.
    pub async fn unread_notifications(&self, user_id: UserId) -> Result<Vec<Notification>> {
        let db = self.db.lock().await;
        Ok(db.unread_notifications_for(user_id)?)
    }

    /// Mark one notification read. The flag only ever moves false -> true;
    /// marking an already-read row is a no-op.
    pub async fn mark_notification_read(
        &self,
        actor: UserId,
        id: NotificationId,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let notification = db.get_notification(id)?;
        if notification.recipient_id != actor {
            return Err(HubError::Forbidden(
                "notification belongs to another user".into(),
            ));
        }
        db.mark_notification_read(id)?;
        Ok(())
    }

    /// Mark every unread notification of the actor read. Returns how many
    /// rows were flipped.
    pub async fn mark_all_notifications_read(&self, actor: UserId) -> Result<usize> {
        let db = self.db.lock().await;
        Ok(db.mark_all_notifications_read(actor)?)
    }
}

/// One title per kind; the match is exhaustive on purpose so a new kind
/// cannot ship without a rendering.
fn title_for(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::NewMessage => "New message",
        NotificationKind::Mention => "You were mentioned",
        NotificationKind::MissedCall => "Missed call",
        NotificationKind::CallIncoming => "Incoming call",
        NotificationKind::Invitation => "Added to a conversation",
    }
}

fn preview(message: &Message) -> String {
    if let Some(content) = &message.content {
        let mut preview: String = content.chars().take(PREVIEW_CHARS).collect();
        if content.chars().count() > PREVIEW_CHARS {
            preview.push('…');
        }
        preview
    } else if let Some(attachment) = &message.attachment {
        format!("[{}]", attachment.kind.as_str())
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubConfig;
    use crate::messages::SendMessage;
    use palabre_shared::types::ConversationKind;
    use palabre_store::Database;

    fn hub() -> Hub {
        Hub::new(Database::open_in_memory().unwrap(), HubConfig::default())
    }

    fn text(content: &str) -> SendMessage {
        SendMessage {
            content: Some(content.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn offline_recipient_gets_one_notification_per_message() {
        let hub = hub();
        let (a, b) = (UserId::new(), UserId::new());
        let conv = hub
            .create_conversation(a, ConversationKind::Direct, &[b], None)
            .await
            .unwrap();

        for i in 1..=3 {
            hub.append(conv.id, a, text(&format!("m{i}"))).await.unwrap();
        }

        // B was offline the whole time: unread count 3, exactly 3
        // new_message rows.
        assert_eq!(hub.unread_count(conv.id, b).await.unwrap(), 3);
        let unread = hub.unread_notifications(b).await.unwrap();
        assert_eq!(unread.len(), 3);
        assert!(unread.iter().all(|n| n.kind == NotificationKind::NewMessage));

        // Reading the conversation clears the unread count without
        // generating anything new.
        assert_eq!(hub.mark_read(conv.id, b, 3).await.unwrap(), 0);
        assert_eq!(hub.unread_notifications(b).await.unwrap().len(), 3);

        // The sender never notifies themself.
        assert!(hub.unread_notifications(a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn active_viewer_is_suppressed_but_still_pushed() {
        let hub = hub();
        let (a, b) = (UserId::new(), UserId::new());
        let conv = hub
            .create_conversation(a, ConversationKind::Direct, &[b], None)
            .await
            .unwrap();

        let (conn, mut rx) = hub.connect(b).await;
        hub.subscribe(conn, Topic::Conversation(conv.id))
            .await
            .unwrap();

        hub.append(conv.id, a, text("live")).await.unwrap();

        // The live push arrived...
        assert!(matches!(
            rx.recv().await.unwrap(),
            HubEvent::MessageAppended(_)
        ));
        // ...and no notification row was written.
        assert!(hub.unread_notifications(b).await.unwrap().is_empty());

        // After B navigates away, rows are written again.
        hub.disconnect(conn).await;
        hub.append(conv.id, a, text("later")).await.unwrap();
        assert_eq!(hub.unread_notifications(b).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mention_bypasses_active_viewer_suppression() {
        let hub = hub();
        let creator = UserId::new();
        let member = UserId::new();
        let conv = hub
            .create_conversation(creator, ConversationKind::Group, &[member], None)
            .await
            .unwrap();

        let (conn, _rx) = hub.connect(member).await;
        hub.subscribe(conn, Topic::Conversation(conv.id))
            .await
            .unwrap();

        hub.append(
            conv.id,
            creator,
            SendMessage {
                content: Some("regarde ça".into()),
                mentions: vec![member],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let unread = hub.unread_notifications(member).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].kind, NotificationKind::Mention);
    }

    #[tokio::test]
    async fn marking_read_is_scoped_to_the_recipient() {
        let hub = hub();
        let (a, b) = (UserId::new(), UserId::new());
        let conv = hub
            .create_conversation(a, ConversationKind::Direct, &[b], None)
            .await
            .unwrap();
        hub.append(conv.id, a, text("hi")).await.unwrap();

        let unread = hub.unread_notifications(b).await.unwrap();
        let id = unread[0].id;

        // A cannot read B's notification.
        assert!(matches!(
            hub.mark_notification_read(a, id).await.unwrap_err(),
            HubError::Forbidden(_)
        ));

        hub.mark_notification_read(b, id).await.unwrap();
        // Duplicate mark is a quiet no-op.
        hub.mark_notification_read(b, id).await.unwrap();
        assert!(hub.unread_notifications(b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_all_reports_flipped_rows() {
        let hub = hub();
        let (a, b) = (UserId::new(), UserId::new());
        let conv = hub
            .create_conversation(a, ConversationKind::Direct, &[b], None)
            .await
            .unwrap();

        for _ in 0..4 {
            hub.append(conv.id, a, text("ping")).await.unwrap();
        }

        assert_eq!(hub.mark_all_notifications_read(b).await.unwrap(), 4);
        assert_eq!(hub.mark_all_notifications_read(b).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn attachment_only_messages_get_a_placeholder_preview() {
        let hub = hub();
        let (a, b) = (UserId::new(), UserId::new());
        let conv = hub
            .create_conversation(a, ConversationKind::Direct, &[b], None)
            .await
            .unwrap();

        hub.append(
            conv.id,
            a,
            SendMessage {
                attachment: Some(palabre_shared::types::Attachment {
                    url: "https://blobs.example/voice.ogg".into(),
                    kind: palabre_shared::types::AttachmentKind::Audio,
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let unread = hub.unread_notifications(b).await.unwrap();
        assert_eq!(unread[0].body, "[audio]");
    }
}
