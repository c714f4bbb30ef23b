//! The message log surface: append and history backfill.
//!
//! `append` is the hot path. It holds the conversation's append lock only
//! for the sequence allocation, the durable insert, and the live push —
//! notification fan-out runs after the lock is released and can never delay
//! another append to a different conversation.

use palabre_shared::constants::{MAX_ATTACHMENT_URL_BYTES, MAX_CONTENT_BYTES, MAX_PAGE_LIMIT};
use palabre_shared::events::{HubEvent, MessageEvent};
use palabre_shared::types::{Attachment, ConversationId, MessageId, UserId};
use palabre_store::Message;

use crate::delivery::Topic;
use crate::error::{HubError, Result};
use crate::hub::Hub;

/// Everything a sender supplies for one append. The attachment must
/// already be uploaded; the log stores only the `(url, kind)` reference.
#[derive(Debug, Clone, Default)]
pub struct SendMessage {
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<MessageId>,
    /// Participants explicitly mentioned; they receive a `mention`
    /// notification that bypasses active-viewer suppression.
    pub mentions: Vec<UserId>,
}

impl Hub {
    /// Append a message to a conversation.
    ///
    /// The sender must be an active participant. Sequence numbers are
    /// allocated under the conversation's append lock, so they are
    /// contiguous and strictly increasing even under concurrent sends;
    /// appends to different conversations proceed in parallel.
    pub async fn append(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        send: SendMessage,
    ) -> Result<Message> {
        validate_payload(&send)?;

        let conv_lock = self.append_lock_for(conversation_id).await;
        let _guard = conv_lock.lock().await;

        let message = {
            let mut db = self.db.lock().await;

            db.get_conversation(conversation_id)?;
            if !db.is_participant(conversation_id, sender_id)? {
                return Err(HubError::Forbidden(
                    "sender is not a participant of this conversation".into(),
                ));
            }

            if let Some(reply_to) = send.reply_to {
                let referent = db.get_message(reply_to)?;
                if referent.conversation_id != conversation_id {
                    return Err(HubError::InvalidOperation(
                        "reply_to references a message from another conversation".into(),
                    ));
                }
            }

            db.append_message(
                conversation_id,
                sender_id,
                send.content,
                send.attachment,
                send.reply_to,
            )?
        };

        tracing::debug!(
            conversation = %conversation_id,
            seq = message.seq,
            "message appended"
        );

        // Push while still holding the append lock so subscribers observe
        // non-decreasing sequence numbers on this topic.
        self.delivery
            .publish(
                Topic::Conversation(conversation_id),
                &HubEvent::MessageAppended(message_event(&message)),
            )
            .await;

        drop(_guard);
        self.release_append_lock(conversation_id, conv_lock).await;

        // Notification rows are a side effect of the durable append; they
        // run outside the critical section, and a failure there must not
        // surface as an append failure — the message is already committed
        // and a client retry would duplicate it.
        if let Err(e) = self.fan_out_message(&message, &send.mentions).await {
            tracing::warn!(
                conversation = %conversation_id,
                seq = message.seq,
                error = %e,
                "notification fan-out failed"
            );
        }

        Ok(message)
    }

    /// Messages with sequence number strictly greater than `since_seq`,
    /// ascending, up to `limit`. This is the reconciliation path for
    /// clients recovering pushes missed while disconnected.
    pub async fn messages_since(
        &self,
        actor: UserId,
        conversation_id: ConversationId,
        since_seq: u64,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let limit = limit.min(MAX_PAGE_LIMIT);

        let db = self.db.lock().await;
        db.get_conversation(conversation_id)?;
        if !db.is_participant(conversation_id, actor)? {
            return Err(HubError::Forbidden(
                "not a participant of this conversation".into(),
            ));
        }

        Ok(db.messages_since(conversation_id, since_seq, limit)?)
    }
}

/// Convert a persisted message into its wire event payload.
pub(crate) fn message_event(message: &Message) -> MessageEvent {
    MessageEvent {
        id: message.id,
        conversation_id: message.conversation_id,
        sender_id: message.sender_id,
        seq: message.seq,
        content: message.content.clone(),
        attachment: message.attachment.clone(),
        reply_to: message.reply_to,
        created_at: message.created_at,
    }
}

fn validate_payload(send: &SendMessage) -> Result<()> {
    if send.content.is_none() && send.attachment.is_none() {
        return Err(HubError::InvalidOperation(
            "a message needs text content, an attachment, or both".into(),
        ));
    }
    if let Some(content) = &send.content {
        if content.len() > MAX_CONTENT_BYTES {
            return Err(HubError::InvalidOperation(format!(
                "content exceeds {MAX_CONTENT_BYTES} bytes"
            )));
        }
    }
    if let Some(attachment) = &send.attachment {
        if attachment.url.is_empty() || attachment.url.len() > MAX_ATTACHMENT_URL_BYTES {
            return Err(HubError::InvalidOperation(
                "attachment URL is empty or too long".into(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubConfig;
    use palabre_shared::types::{AttachmentKind, ConversationKind};
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

    async fn direct_pair(hub: &Hub) -> (ConversationId, UserId, UserId) {
        let (a, b) = (UserId::new(), UserId::new());
        let conv = hub
            .create_conversation(a, ConversationKind::Direct, &[b], None)
            .await
            .unwrap();
        (conv.id, a, b)
    }

    #[tokio::test]
    async fn append_assigns_contiguous_sequence_numbers() {
        let hub = hub();
        let (conv, a, _) = direct_pair(&hub).await;

        for expected in 1..=4u64 {
            let msg = hub.append(conv, a, text("hello")).await.unwrap();
            assert_eq!(msg.seq, expected);
        }
    }

    #[tokio::test]
    async fn concurrent_appends_never_reuse_a_sequence_number() {
        let hub = hub();
        let (conv, a, b) = direct_pair(&hub).await;

        let mut tasks = Vec::new();
        for i in 0..20 {
            let hub = hub.clone();
            let sender = if i % 2 == 0 { a } else { b };
            tasks.push(tokio::spawn(async move {
                hub.append(conv, sender, text("race")).await.unwrap().seq
            }));
        }

        let mut seqs = Vec::new();
        for task in tasks {
            seqs.push(task.await.unwrap());
        }
        seqs.sort_unstable();

        let expected: Vec<u64> = (1..=20).collect();
        assert_eq!(seqs, expected);
    }

    #[tokio::test]
    async fn append_succeeds_even_if_notification_storage_fails() {
        let hub = hub();
        let (conv, a, _) = direct_pair(&hub).await;

        // Break notification storage only; the message log stays intact.
        {
            let db = hub.db.lock().await;
            db.conn().execute("DROP TABLE notifications", []).unwrap();
        }

        let msg = hub.append(conv, a, text("still lands")).await.unwrap();
        assert_eq!(msg.seq, 1);

        let db = hub.db.lock().await;
        assert_eq!(db.latest_seq(conv).unwrap(), 1);
    }

    #[tokio::test]
    async fn append_lock_map_is_evicted_after_use() {
        let hub = hub();
        let (conv_a, a, _) = direct_pair(&hub).await;
        let (conv_b, c, _) = direct_pair(&hub).await;

        hub.append(conv_a, a, text("un")).await.unwrap();
        hub.append(conv_b, c, text("deux")).await.unwrap();

        assert!(hub.append_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn non_participant_sender_is_forbidden() {
        let hub = hub();
        let (conv, _, _) = direct_pair(&hub).await;

        let err = hub
            .append(conv, UserId::new(), text("intrus"))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Forbidden(_)));
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let hub = hub();
        let (conv, a, _) = direct_pair(&hub).await;

        let err = hub.append(conv, a, SendMessage::default()).await.unwrap_err();
        assert!(matches!(err, HubError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn attachment_only_message_is_accepted() {
        let hub = hub();
        let (conv, a, _) = direct_pair(&hub).await;

        let msg = hub
            .append(
                conv,
                a,
                SendMessage {
                    attachment: Some(Attachment {
                        url: "https://blobs.example/photo.jpg".into(),
                        kind: AttachmentKind::Image,
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(msg.content.is_none());
        assert!(msg.attachment.is_some());
    }

    #[tokio::test]
    async fn cross_conversation_reply_is_rejected() {
        let hub = hub();
        let (conv_a, a, _) = direct_pair(&hub).await;
        let (conv_b, c, _) = direct_pair(&hub).await;

        let original = hub.append(conv_b, c, text("ailleurs")).await.unwrap();

        let err = hub
            .append(
                conv_a,
                a,
                SendMessage {
                    content: Some("re".into()),
                    reply_to: Some(original.id),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn reconnect_backfill_returns_exact_tail() {
        let hub = hub();
        let (conv, a, b) = direct_pair(&hub).await;

        for i in 1..=9 {
            hub.append(conv, a, text(&format!("m{i}"))).await.unwrap();
        }

        // Client saw up to seq 5 before disconnecting.
        let tail = hub.messages_since(b, conv, 5, 50).await.unwrap();
        let seqs: Vec<u64> = tail.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn live_subscribers_receive_appends_in_order() {
        let hub = hub();
        let (conv, a, b) = direct_pair(&hub).await;

        let (conn, mut rx) = hub.connect(b).await;
        hub.subscribe(conn, Topic::Conversation(conv)).await.unwrap();

        hub.append(conv, a, text("un")).await.unwrap();
        hub.append(conv, a, text("deux")).await.unwrap();

        for expected in 1..=2u64 {
            match rx.recv().await.unwrap() {
                HubEvent::MessageAppended(m) => assert_eq!(m.seq, expected),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }
}
