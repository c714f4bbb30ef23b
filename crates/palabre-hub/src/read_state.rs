//! The read-state tracker: per-participant watermarks and unread counts.

use palabre_shared::types::{ConversationId, UserId};

use crate::error::Result;
use crate::hub::Hub;

impl Hub {
    /// Advance a participant's read marker to `max(current, upto_seq)` and
    /// return the remaining unread count.
    ///
    /// Monotonic: a late or duplicate call never moves the marker backward.
    /// A non-participant caller is a no-op returning 0 (the UI may race
    /// with a conversation-leave). The marker is clamped to the log tail so
    /// an over-eager client cannot pre-read messages that do not exist yet.
    pub async fn mark_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        upto_seq: u64,
    ) -> Result<u64> {
        let db = self.db.lock().await;

        let latest = match db.latest_seq(conversation_id) {
            Ok(latest) => latest,
            Err(palabre_store::StoreError::NotFound) => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let marker = db.advance_read_marker(conversation_id, user_id, upto_seq.min(latest))?;
        match marker {
            Some(marker) => Ok(latest.saturating_sub(marker)),
            None => Ok(0),
        }
    }

    /// A participant's unread count: `latest_seq - marker`, floored at 0.
    /// Non-participants get 0.
    pub async fn unread_count(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<u64> {
        let db = self.db.lock().await;

        let latest = match db.latest_seq(conversation_id) {
            Ok(latest) => latest,
            Err(palabre_store::StoreError::NotFound) => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        match db.read_marker(conversation_id, user_id)? {
            Some(marker) => Ok(latest.saturating_sub(marker)),
            None => Ok(0),
        }
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
    async fn unread_counts_follow_appends_and_reads() {
        let hub = hub();
        let (a, b) = (UserId::new(), UserId::new());
        let conv = hub
            .create_conversation(a, ConversationKind::Direct, &[b], None)
            .await
            .unwrap();

        for i in 1..=3 {
            hub.append(conv.id, a, text(&format!("m{i}"))).await.unwrap();
        }

        assert_eq!(hub.unread_count(conv.id, b).await.unwrap(), 3);

        let remaining = hub.mark_read(conv.id, b, 3).await.unwrap();
        assert_eq!(remaining, 0);
        assert_eq!(hub.unread_count(conv.id, b).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mark_read_is_monotonic() {
        let hub = hub();
        let (a, b) = (UserId::new(), UserId::new());
        let conv = hub
            .create_conversation(a, ConversationKind::Direct, &[b], None)
            .await
            .unwrap();

        for i in 1..=5 {
            hub.append(conv.id, a, text(&format!("m{i}"))).await.unwrap();
        }

        assert_eq!(hub.mark_read(conv.id, b, 4).await.unwrap(), 1);
        // Stale duplicate: marker stays at 4, unread stays at 1.
        assert_eq!(hub.mark_read(conv.id, b, 2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn marker_is_clamped_to_log_tail() {
        let hub = hub();
        let (a, b) = (UserId::new(), UserId::new());
        let conv = hub
            .create_conversation(a, ConversationKind::Direct, &[b], None)
            .await
            .unwrap();

        hub.append(conv.id, a, text("only one")).await.unwrap();

        // Client claims to have read far beyond the tail.
        assert_eq!(hub.mark_read(conv.id, b, 999).await.unwrap(), 0);

        // A later append is still unread.
        hub.append(conv.id, a, text("two")).await.unwrap();
        assert_eq!(hub.unread_count(conv.id, b).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn non_participant_read_is_a_quiet_zero() {
        let hub = hub();
        let (a, b) = (UserId::new(), UserId::new());
        let conv = hub
            .create_conversation(a, ConversationKind::Direct, &[b], None)
            .await
            .unwrap();
        hub.append(conv.id, a, text("m")).await.unwrap();

        let stranger = UserId::new();
        assert_eq!(hub.mark_read(conv.id, stranger, 1).await.unwrap(), 0);
        assert_eq!(hub.unread_count(conv.id, stranger).await.unwrap(), 0);

        // Unknown conversation behaves the same way.
        assert_eq!(
            hub.mark_read(ConversationId::new(), a, 1).await.unwrap(),
            0
        );
    }
}
