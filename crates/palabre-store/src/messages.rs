//! The append-only message log.
//!
//! Sequence allocation happens inside a single transaction: the
//! conversation's `last_seq` counter is incremented and the message row is
//! inserted with the new value before the transaction commits. Two
//! concurrent appends to the same conversation can therefore never observe
//! the same sequence number, and the per-conversation run stays contiguous
//! from 1.

use chrono::Utc;
use rusqlite::params;

use palabre_shared::types::{Attachment, AttachmentKind, ConversationId, MessageId, UserId};

use crate::conversations::{parse_timestamp, parse_uuid};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Message;

impl Database {
    /// Append a message to a conversation, allocating the next sequence
    /// number and bumping `last_message_at` atomically.
    ///
    /// Membership and content validation belong to the hub layer; this
    /// method only guarantees the sequencing invariant.
    pub fn append_message(
        &mut self,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: Option<String>,
        attachment: Option<Attachment>,
        reply_to: Option<MessageId>,
    ) -> Result<Message> {
        let id = MessageId::new();
        let created_at = Utc::now();

        let tx = self.conn_mut().transaction()?;

        let affected = tx.execute(
            "UPDATE conversations
             SET last_seq = last_seq + 1, last_message_at = ?2
             WHERE id = ?1",
            params![conversation_id.to_string(), created_at.to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }

        let seq: i64 = tx.query_row(
            "SELECT last_seq FROM conversations WHERE id = ?1",
            params![conversation_id.to_string()],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO messages
                 (id, conversation_id, sender_id, seq, content,
                  attachment_url, attachment_kind, reply_to, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id.to_string(),
                conversation_id.to_string(),
                sender_id.to_string(),
                seq,
                content,
                attachment.as_ref().map(|a| a.url.clone()),
                attachment.as_ref().map(|a| a.kind.as_str()),
                reply_to.map(|m| m.to_string()),
                created_at.to_rfc3339(),
            ],
        )?;

        tx.commit()?;

        Ok(Message {
            id,
            conversation_id,
            sender_id,
            seq: seq as u64,
            content,
            attachment,
            reply_to,
            created_at,
        })
    }

    /// Fetch a single message by id.
    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                "SELECT id, conversation_id, sender_id, seq, content,
                        attachment_url, attachment_kind, reply_to, created_at
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Messages with sequence number strictly greater than `since_seq`,
    /// ascending, up to `limit` rows. The cursor is restartable: calling
    /// again with the last returned seq continues where the previous page
    /// stopped.
    pub fn messages_since(
        &self,
        conversation_id: ConversationId,
        since_seq: u64,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, conversation_id, sender_id, seq, content,
                    attachment_url, attachment_kind, reply_to, created_at
             FROM messages
             WHERE conversation_id = ?1 AND seq > ?2
             ORDER BY seq ASC
             LIMIT ?3",
        )?;

        let rows = stmt.query_map(
            params![conversation_id.to_string(), since_seq as i64, limit],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// The latest allocated sequence number for a conversation (0 if no
    /// message has ever been appended).
    pub fn latest_seq(&self, conversation_id: ConversationId) -> Result<u64> {
        let seq: i64 = self
            .conn()
            .query_row(
                "SELECT last_seq FROM conversations WHERE id = ?1",
                params![conversation_id.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;
        Ok(seq as u64)
    }

    /// The newest message of a conversation, used for listing previews.
    pub fn last_message_for(&self, conversation_id: ConversationId) -> Result<Option<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, conversation_id, sender_id, seq, content,
                    attachment_url, attachment_kind, reply_to, created_at
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY seq DESC
             LIMIT 1",
        )?;

        let mut rows = stmt.query_map(params![conversation_id.to_string()], row_to_message)?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let conversation_str: String = row.get(1)?;
    let sender_str: String = row.get(2)?;
    let seq: i64 = row.get(3)?;
    let content: Option<String> = row.get(4)?;
    let attachment_url: Option<String> = row.get(5)?;
    let attachment_kind: Option<String> = row.get(6)?;
    let reply_to_str: Option<String> = row.get(7)?;
    let created_str: String = row.get(8)?;

    let attachment = match (attachment_url, attachment_kind) {
        (Some(url), Some(kind_str)) => {
            let kind = AttachmentKind::parse(&kind_str).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    6,
                    rusqlite::types::Type::Text,
                    format!("unknown attachment kind: {kind_str}").into(),
                )
            })?;
            Some(Attachment { url, kind })
        }
        _ => None,
    };

    let reply_to = reply_to_str
        .map(|s| parse_uuid(7, &s).map(MessageId))
        .transpose()?;

    Ok(Message {
        id: MessageId(parse_uuid(0, &id_str)?),
        conversation_id: ConversationId(parse_uuid(1, &conversation_str)?),
        sender_id: UserId(parse_uuid(2, &sender_str)?),
        seq: seq as u64,
        content,
        attachment,
        reply_to,
        created_at: parse_timestamp(8, &created_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use palabre_shared::types::ConversationKind;

    use crate::models::Conversation;

    fn new_conversation(db: &Database) -> ConversationId {
        let now = Utc::now();
        let conv = Conversation {
            id: ConversationId::new(),
            kind: ConversationKind::Group,
            name: None,
            created_by: UserId::new(),
            archived: false,
            last_seq: 0,
            created_at: now,
            last_message_at: now,
        };
        db.create_conversation(&conv).unwrap();
        conv.id
    }

    #[test]
    fn sequence_numbers_are_contiguous_from_one() {
        let mut db = Database::open_in_memory().unwrap();
        let conv = new_conversation(&db);
        let sender = UserId::new();

        for expected in 1..=5u64 {
            let msg = db
                .append_message(conv, sender, Some(format!("m{expected}")), None, None)
                .unwrap();
            assert_eq!(msg.seq, expected);
        }

        assert_eq!(db.latest_seq(conv).unwrap(), 5);
    }

    #[test]
    fn sequences_are_scoped_per_conversation() {
        let mut db = Database::open_in_memory().unwrap();
        let conv_a = new_conversation(&db);
        let conv_b = new_conversation(&db);
        let sender = UserId::new();

        db.append_message(conv_a, sender, Some("a1".into()), None, None)
            .unwrap();
        db.append_message(conv_a, sender, Some("a2".into()), None, None)
            .unwrap();
        let b1 = db
            .append_message(conv_b, sender, Some("b1".into()), None, None)
            .unwrap();

        assert_eq!(b1.seq, 1);
        assert_eq!(db.latest_seq(conv_a).unwrap(), 2);
    }

    #[test]
    fn append_to_missing_conversation_is_not_found() {
        let mut db = Database::open_in_memory().unwrap();
        let err = db
            .append_message(
                ConversationId::new(),
                UserId::new(),
                Some("hi".into()),
                None,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn since_cursor_returns_ascending_tail() {
        let mut db = Database::open_in_memory().unwrap();
        let conv = new_conversation(&db);
        let sender = UserId::new();

        for i in 1..=8 {
            db.append_message(conv, sender, Some(format!("m{i}")), None, None)
                .unwrap();
        }

        let page = db.messages_since(conv, 5, 50).unwrap();
        let seqs: Vec<u64> = page.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![6, 7, 8]);

        let limited = db.messages_since(conv, 0, 3).unwrap();
        assert_eq!(limited.len(), 3);
        assert_eq!(limited[0].seq, 1);
    }

    #[test]
    fn attachment_round_trip() {
        let mut db = Database::open_in_memory().unwrap();
        let conv = new_conversation(&db);

        let attachment = Attachment {
            url: "https://blobs.example/abc123".into(),
            kind: AttachmentKind::Image,
        };
        let msg = db
            .append_message(conv, UserId::new(), None, Some(attachment.clone()), None)
            .unwrap();

        let fetched = db.get_message(msg.id).unwrap();
        assert_eq!(fetched.attachment, Some(attachment));
        assert_eq!(fetched.content, None);
    }

    #[test]
    fn last_message_preview_tracks_newest() {
        let mut db = Database::open_in_memory().unwrap();
        let conv = new_conversation(&db);
        let sender = UserId::new();

        assert!(db.last_message_for(conv).unwrap().is_none());

        db.append_message(conv, sender, Some("first".into()), None, None)
            .unwrap();
        db.append_message(conv, sender, Some("second".into()), None, None)
            .unwrap();

        let preview = db.last_message_for(conv).unwrap().unwrap();
        assert_eq!(preview.content.as_deref(), Some("second"));
        assert_eq!(preview.seq, 2);
    }
}
