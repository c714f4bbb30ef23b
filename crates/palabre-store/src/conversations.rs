//! CRUD operations for [`Conversation`] and [`Participant`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use palabre_shared::types::{ConversationId, ConversationKind, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Conversation, Participant};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new conversation row.
    pub fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.conn().execute(
            "INSERT INTO conversations
                 (id, kind, name, created_by, archived, last_seq, created_at, last_message_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                conversation.id.to_string(),
                conversation.kind.as_str(),
                conversation.name,
                conversation.created_by.to_string(),
                conversation.archived,
                conversation.last_seq as i64,
                conversation.created_at.to_rfc3339(),
                conversation.last_message_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Insert a membership row. Returns `false` if the user was already a
    /// participant (the insert is deduplicated, not an error).
    pub fn add_participant(&self, participant: &Participant) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO participants
                 (conversation_id, user_id, joined_at, last_read_seq)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                participant.conversation_id.to_string(),
                participant.user_id.to_string(),
                participant.joined_at.to_rfc3339(),
                participant.last_read_seq.map(|s| s as i64),
            ],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single conversation by id.
    pub fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        self.conn()
            .query_row(
                "SELECT id, kind, name, created_by, archived, last_seq, created_at, last_message_at
                 FROM conversations
                 WHERE id = ?1",
                params![id.to_string()],
                row_to_conversation,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// List the non-archived conversations a user participates in, most
    /// recent activity first.
    pub fn list_conversations_for_user(&self, user_id: UserId) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id, c.kind, c.name, c.created_by, c.archived, c.last_seq,
                    c.created_at, c.last_message_at
             FROM conversations c
             JOIN participants p ON p.conversation_id = c.id
             WHERE p.user_id = ?1 AND c.archived = 0
             ORDER BY c.last_message_at DESC",
        )?;

        let rows = stmt.query_map(params![user_id.to_string()], row_to_conversation)?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }

    /// Find the non-archived direct conversation between two users, if one
    /// exists. The pair is unordered: (a, b) and (b, a) find the same row.
    pub fn find_active_direct_between(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Conversation>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id, c.kind, c.name, c.created_by, c.archived, c.last_seq,
                    c.created_at, c.last_message_at
             FROM conversations c
             JOIN participants pa ON pa.conversation_id = c.id AND pa.user_id = ?1
             JOIN participants pb ON pb.conversation_id = c.id AND pb.user_id = ?2
             WHERE c.kind = 'direct' AND c.archived = 0
             LIMIT 1",
        )?;

        let mut rows = stmt.query_map(
            params![a.to_string(), b.to_string()],
            row_to_conversation,
        )?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Fetch a membership row, or `None` if the user is not a participant.
    pub fn get_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<Option<Participant>> {
        let mut stmt = self.conn().prepare(
            "SELECT conversation_id, user_id, joined_at, last_read_seq
             FROM participants
             WHERE conversation_id = ?1 AND user_id = ?2",
        )?;

        let mut rows = stmt.query_map(
            params![conversation_id.to_string(), user_id.to_string()],
            row_to_participant,
        )?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// List all participants of a conversation, ordered by join time.
    pub fn list_participants(&self, conversation_id: ConversationId) -> Result<Vec<Participant>> {
        let mut stmt = self.conn().prepare(
            "SELECT conversation_id, user_id, joined_at, last_read_seq
             FROM participants
             WHERE conversation_id = ?1
             ORDER BY joined_at ASC",
        )?;

        let rows = stmt.query_map(params![conversation_id.to_string()], row_to_participant)?;

        let mut participants = Vec::new();
        for row in rows {
            participants.push(row?);
        }
        Ok(participants)
    }

    /// Whether the user is currently a participant of the conversation.
    pub fn is_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool> {
        let count: u32 = self.conn().query_row(
            "SELECT COUNT(*) FROM participants
             WHERE conversation_id = ?1 AND user_id = ?2",
            params![conversation_id.to_string(), user_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ------------------------------------------------------------------
    // Update / delete
    // ------------------------------------------------------------------

    /// Mark a conversation archived. Returns `true` if a row changed.
    pub fn set_archived(&self, id: ConversationId, archived: bool) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE conversations SET archived = ?2 WHERE id = ?1",
            params![id.to_string(), archived],
        )?;
        Ok(affected > 0)
    }

    /// Remove a membership row. Returns `true` if the user was a participant.
    pub fn remove_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM participants WHERE conversation_id = ?1 AND user_id = ?2",
            params![conversation_id.to_string(), user_id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Conversation`].
fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id_str: String = row.get(0)?;
    let kind_str: String = row.get(1)?;
    let name: Option<String> = row.get(2)?;
    let created_by_str: String = row.get(3)?;
    let archived: bool = row.get(4)?;
    let last_seq: i64 = row.get(5)?;
    let created_str: String = row.get(6)?;
    let last_message_str: String = row.get(7)?;

    Ok(Conversation {
        id: ConversationId(parse_uuid(0, &id_str)?),
        kind: ConversationKind::parse(&kind_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                format!("unknown conversation kind: {kind_str}").into(),
            )
        })?,
        name,
        created_by: UserId(parse_uuid(3, &created_by_str)?),
        archived,
        last_seq: last_seq as u64,
        created_at: parse_timestamp(6, &created_str)?,
        last_message_at: parse_timestamp(7, &last_message_str)?,
    })
}

/// Map a `rusqlite::Row` to a [`Participant`].
fn row_to_participant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Participant> {
    let conversation_str: String = row.get(0)?;
    let user_str: String = row.get(1)?;
    let joined_str: String = row.get(2)?;
    let last_read_seq: Option<i64> = row.get(3)?;

    Ok(Participant {
        conversation_id: ConversationId(parse_uuid(0, &conversation_str)?),
        user_id: UserId(parse_uuid(1, &user_str)?),
        joined_at: parse_timestamp(2, &joined_str)?,
        last_read_seq: last_read_seq.map(|s| s as u64),
    })
}

pub(crate) fn parse_uuid(col: usize, s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_timestamp(col: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn conversation(kind: ConversationKind) -> Conversation {
        let now = Utc::now();
        Conversation {
            id: ConversationId::new(),
            kind,
            name: None,
            created_by: UserId::new(),
            archived: false,
            last_seq: 0,
            created_at: now,
            last_message_at: now,
        }
    }

    fn participant(conversation_id: ConversationId, user_id: UserId) -> Participant {
        Participant {
            conversation_id,
            user_id,
            joined_at: Utc::now(),
            last_read_seq: None,
        }
    }

    #[test]
    fn create_and_fetch_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let conv = conversation(ConversationKind::Group);

        db.create_conversation(&conv).unwrap();
        let fetched = db.get_conversation(conv.id).unwrap();

        assert_eq!(fetched.id, conv.id);
        assert_eq!(fetched.kind, ConversationKind::Group);
        assert!(!fetched.archived);
        assert_eq!(fetched.last_seq, 0);
    }

    #[test]
    fn get_missing_conversation_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db.get_conversation(ConversationId::new()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn duplicate_participant_insert_is_deduplicated() {
        let db = Database::open_in_memory().unwrap();
        let conv = conversation(ConversationKind::Group);
        db.create_conversation(&conv).unwrap();

        let user = UserId::new();
        assert!(db.add_participant(&participant(conv.id, user)).unwrap());
        assert!(!db.add_participant(&participant(conv.id, user)).unwrap());

        assert_eq!(db.list_participants(conv.id).unwrap().len(), 1);
    }

    #[test]
    fn direct_pair_lookup_is_unordered() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());

        let conv = conversation(ConversationKind::Direct);
        db.create_conversation(&conv).unwrap();
        db.add_participant(&participant(conv.id, a)).unwrap();
        db.add_participant(&participant(conv.id, b)).unwrap();

        let found_ab = db.find_active_direct_between(a, b).unwrap().unwrap();
        let found_ba = db.find_active_direct_between(b, a).unwrap().unwrap();
        assert_eq!(found_ab.id, conv.id);
        assert_eq!(found_ba.id, conv.id);
    }

    #[test]
    fn archived_direct_thread_is_not_found_by_pair_lookup() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());

        let conv = conversation(ConversationKind::Direct);
        db.create_conversation(&conv).unwrap();
        db.add_participant(&participant(conv.id, a)).unwrap();
        db.add_participant(&participant(conv.id, b)).unwrap();

        assert!(db.set_archived(conv.id, true).unwrap());
        assert!(db.find_active_direct_between(a, b).unwrap().is_none());
    }

    #[test]
    fn listing_excludes_archived_and_foreign_threads() {
        let db = Database::open_in_memory().unwrap();
        let user = UserId::new();

        let mine = conversation(ConversationKind::Group);
        db.create_conversation(&mine).unwrap();
        db.add_participant(&participant(mine.id, user)).unwrap();

        let archived = conversation(ConversationKind::Group);
        db.create_conversation(&archived).unwrap();
        db.add_participant(&participant(archived.id, user)).unwrap();
        db.set_archived(archived.id, true).unwrap();

        let foreign = conversation(ConversationKind::Group);
        db.create_conversation(&foreign).unwrap();

        let listed = db.list_conversations_for_user(user).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, mine.id);
    }
}
