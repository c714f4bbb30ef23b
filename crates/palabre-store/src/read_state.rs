//! Per-participant read markers.
//!
//! The marker is a sequence-number watermark on the membership row, not a
//! per-message read receipt table. Advancing it is monotonic at the SQL
//! level, so a late or duplicate `mark_read` can never move it backward.

use rusqlite::params;

use palabre_shared::types::{ConversationId, UserId};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Advance a participant's read marker to `max(current, upto_seq)`.
    ///
    /// Returns the resulting marker, or `None` if the user is not a
    /// participant of the conversation (a deliberate no-op: the caller may
    /// race with a conversation-leave).
    pub fn advance_read_marker(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        upto_seq: u64,
    ) -> Result<Option<u64>> {
        let affected = self.conn().execute(
            "UPDATE participants
             SET last_read_seq = MAX(COALESCE(last_read_seq, 0), ?3)
             WHERE conversation_id = ?1 AND user_id = ?2",
            params![
                conversation_id.to_string(),
                user_id.to_string(),
                upto_seq as i64,
            ],
        )?;

        if affected == 0 {
            return Ok(None);
        }

        let marker: i64 = self.conn().query_row(
            "SELECT last_read_seq FROM participants
             WHERE conversation_id = ?1 AND user_id = ?2",
            params![conversation_id.to_string(), user_id.to_string()],
            |row| row.get(0),
        )?;

        Ok(Some(marker as u64))
    }

    /// A participant's current read marker (0 if never read, `None` if not
    /// a participant).
    pub fn read_marker(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<Option<u64>> {
        let mut stmt = self.conn().prepare(
            "SELECT COALESCE(last_read_seq, 0) FROM participants
             WHERE conversation_id = ?1 AND user_id = ?2",
        )?;

        let mut rows = stmt.query_map(
            params![conversation_id.to_string(), user_id.to_string()],
            |row| row.get::<_, i64>(0),
        )?;

        match rows.next() {
            Some(row) => Ok(Some(row? as u64)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use palabre_shared::types::ConversationKind;

    use crate::models::{Conversation, Participant};

    fn setup() -> (Database, ConversationId, UserId) {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let conv = Conversation {
            id: ConversationId::new(),
            kind: ConversationKind::Direct,
            name: None,
            created_by: UserId::new(),
            archived: false,
            last_seq: 0,
            created_at: now,
            last_message_at: now,
        };
        db.create_conversation(&conv).unwrap();

        let user = UserId::new();
        db.add_participant(&Participant {
            conversation_id: conv.id,
            user_id: user,
            joined_at: now,
            last_read_seq: None,
        })
        .unwrap();

        (db, conv.id, user)
    }

    #[test]
    fn marker_starts_at_zero() {
        let (db, conv, user) = setup();
        assert_eq!(db.read_marker(conv, user).unwrap(), Some(0));
    }

    #[test]
    fn marker_is_monotonic() {
        let (db, conv, user) = setup();

        assert_eq!(db.advance_read_marker(conv, user, 5).unwrap(), Some(5));
        // A stale duplicate never moves the marker backward.
        assert_eq!(db.advance_read_marker(conv, user, 3).unwrap(), Some(5));
        assert_eq!(db.advance_read_marker(conv, user, 9).unwrap(), Some(9));
    }

    #[test]
    fn non_participant_is_a_no_op() {
        let (db, conv, _) = setup();
        let stranger = UserId::new();

        assert_eq!(db.advance_read_marker(conv, stranger, 4).unwrap(), None);
        assert_eq!(db.read_marker(conv, stranger).unwrap(), None);
    }
}
