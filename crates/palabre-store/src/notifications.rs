//! CRUD operations for [`Notification`] records.
//!
//! Rows are written by the fan-out layer only and drained by external
//! push/SMS/email transports. The read flag moves false -> true exactly
//! once and never reverts.

use rusqlite::params;

use palabre_shared::types::{NotificationId, NotificationKind, UserId};

use crate::conversations::{parse_timestamp, parse_uuid};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Notification;

impl Database {
    /// Insert a notification row.
    pub fn insert_notification(&self, notification: &Notification) -> Result<()> {
        let payload = notification
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn().execute(
            "INSERT INTO notifications
                 (id, recipient_id, kind, title, body, read, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                notification.id.to_string(),
                notification.recipient_id.to_string(),
                notification.kind.as_str(),
                notification.title,
                notification.body,
                notification.read,
                payload,
                notification.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single notification by id.
    pub fn get_notification(&self, id: NotificationId) -> Result<Notification> {
        self.conn()
            .query_row(
                "SELECT id, recipient_id, kind, title, body, read, payload, created_at
                 FROM notifications WHERE id = ?1",
                params![id.to_string()],
                row_to_notification,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Unread notifications for a recipient, newest first.
    pub fn unread_notifications_for(&self, recipient_id: UserId) -> Result<Vec<Notification>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, recipient_id, kind, title, body, read, payload, created_at
             FROM notifications
             WHERE recipient_id = ?1 AND read = 0
             ORDER BY created_at DESC",
        )?;

        let rows = stmt.query_map(params![recipient_id.to_string()], row_to_notification)?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?);
        }
        Ok(notifications)
    }

    /// Flip a notification's read flag to true. Returns `false` if it was
    /// already read (the flag never moves back).
    pub fn mark_notification_read(&self, id: NotificationId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE notifications SET read = 1 WHERE id = ?1 AND read = 0",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Mark every unread notification of a recipient read. Returns the
    /// number of rows flipped.
    pub fn mark_all_notifications_read(&self, recipient_id: UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE notifications SET read = 1 WHERE recipient_id = ?1 AND read = 0",
            params![recipient_id.to_string()],
        )?;
        Ok(affected)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let id_str: String = row.get(0)?;
    let recipient_str: String = row.get(1)?;
    let kind_str: String = row.get(2)?;
    let title: String = row.get(3)?;
    let body: String = row.get(4)?;
    let read: bool = row.get(5)?;
    let payload_str: Option<String> = row.get(6)?;
    let created_str: String = row.get(7)?;

    let payload = payload_str
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Notification {
        id: NotificationId(parse_uuid(0, &id_str)?),
        recipient_id: UserId(parse_uuid(1, &recipient_str)?),
        kind: NotificationKind::parse(&kind_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown notification kind: {kind_str}").into(),
            )
        })?,
        title,
        body,
        read,
        payload,
        created_at: parse_timestamp(7, &created_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn notification(recipient: UserId) -> Notification {
        Notification {
            id: NotificationId::new(),
            recipient_id: recipient,
            kind: NotificationKind::NewMessage,
            title: "New message".into(),
            body: "You have a new message".into(),
            read: false,
            payload: Some(json!({ "conversation_id": "abc" })),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn insert_and_fetch_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let n = notification(UserId::new());

        db.insert_notification(&n).unwrap();
        let fetched = db.get_notification(n.id).unwrap();

        assert_eq!(fetched.kind, NotificationKind::NewMessage);
        assert_eq!(fetched.payload, n.payload);
        assert!(!fetched.read);
    }

    #[test]
    fn read_flag_is_monotonic() {
        let db = Database::open_in_memory().unwrap();
        let n = notification(UserId::new());
        db.insert_notification(&n).unwrap();

        assert!(db.mark_notification_read(n.id).unwrap());
        // Second flip is a no-op, not an error.
        assert!(!db.mark_notification_read(n.id).unwrap());
        assert!(db.get_notification(n.id).unwrap().read);
    }

    #[test]
    fn unread_listing_and_mark_all() {
        let db = Database::open_in_memory().unwrap();
        let recipient = UserId::new();

        for _ in 0..3 {
            db.insert_notification(&notification(recipient)).unwrap();
        }
        // Someone else's notification must not leak into the listing.
        db.insert_notification(&notification(UserId::new())).unwrap();

        assert_eq!(db.unread_notifications_for(recipient).unwrap().len(), 3);
        assert_eq!(db.mark_all_notifications_read(recipient).unwrap(), 3);
        assert!(db.unread_notifications_for(recipient).unwrap().is_empty());
    }
}
