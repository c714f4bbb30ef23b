//! CRUD operations for [`CallSession`] records.

use rusqlite::params;

use palabre_shared::types::{CallId, CallKind, CallState, UserId};

use crate::conversations::{parse_timestamp, parse_uuid};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::CallSession;

const CALL_COLUMNS: &str =
    "id, caller_id, receiver_id, kind, state, created_at, started_at, ended_at, duration_secs";

impl Database {
    /// Insert a new call session row.
    pub fn insert_call(&self, session: &CallSession) -> Result<()> {
        self.conn().execute(
            "INSERT INTO calls
                 (id, caller_id, receiver_id, kind, state, created_at,
                  started_at, ended_at, duration_secs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                session.id.to_string(),
                session.caller_id.to_string(),
                session.receiver_id.to_string(),
                session.kind.as_str(),
                session.state.as_str(),
                session.created_at.to_rfc3339(),
                session.started_at.map(|t| t.to_rfc3339()),
                session.ended_at.map(|t| t.to_rfc3339()),
                session.duration_secs.map(|d| d as i64),
            ],
        )?;
        Ok(())
    }

    /// Fetch a call session by id.
    pub fn get_call(&self, id: CallId) -> Result<CallSession> {
        self.conn()
            .query_row(
                &format!("SELECT {CALL_COLUMNS} FROM calls WHERE id = ?1"),
                params![id.to_string()],
                row_to_call,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Find a non-terminal session for the ordered (caller, receiver) pair.
    pub fn find_open_call_for_pair(
        &self,
        caller_id: UserId,
        receiver_id: UserId,
    ) -> Result<Option<CallSession>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CALL_COLUMNS} FROM calls
             WHERE caller_id = ?1 AND receiver_id = ?2
               AND state IN ('ringing', 'active')
             LIMIT 1"
        ))?;

        let mut rows = stmt.query_map(
            params![caller_id.to_string(), receiver_id.to_string()],
            row_to_call,
        )?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Persist the mutable fields of a session after a state transition.
    pub fn update_call(&self, session: &CallSession) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE calls
             SET state = ?2, started_at = ?3, ended_at = ?4, duration_secs = ?5
             WHERE id = ?1",
            params![
                session.id.to_string(),
                session.state.as_str(),
                session.started_at.map(|t| t.to_rfc3339()),
                session.ended_at.map(|t| t.to_rfc3339()),
                session.duration_secs.map(|d| d as i64),
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Terminal call sessions involving a user, newest first. Backs the
    /// call-history view.
    pub fn list_settled_calls_for_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<CallSession>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CALL_COLUMNS} FROM calls
             WHERE (caller_id = ?1 OR receiver_id = ?1)
               AND state IN ('rejected', 'missed', 'ended')
             ORDER BY created_at DESC
             LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![user_id.to_string(), limit], row_to_call)?;

        let mut calls = Vec::new();
        for row in rows {
            calls.push(row?);
        }
        Ok(calls)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_call(row: &rusqlite::Row<'_>) -> rusqlite::Result<CallSession> {
    let id_str: String = row.get(0)?;
    let caller_str: String = row.get(1)?;
    let receiver_str: String = row.get(2)?;
    let kind_str: String = row.get(3)?;
    let state_str: String = row.get(4)?;
    let created_str: String = row.get(5)?;
    let started_str: Option<String> = row.get(6)?;
    let ended_str: Option<String> = row.get(7)?;
    let duration: Option<i64> = row.get(8)?;

    Ok(CallSession {
        id: CallId(parse_uuid(0, &id_str)?),
        caller_id: UserId(parse_uuid(1, &caller_str)?),
        receiver_id: UserId(parse_uuid(2, &receiver_str)?),
        kind: CallKind::parse(&kind_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown call kind: {kind_str}").into(),
            )
        })?,
        state: CallState::parse(&state_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("unknown call state: {state_str}").into(),
            )
        })?,
        created_at: parse_timestamp(5, &created_str)?,
        started_at: started_str
            .map(|s| parse_timestamp(6, &s))
            .transpose()?,
        ended_at: ended_str.map(|s| parse_timestamp(7, &s)).transpose()?,
        duration_secs: duration.map(|d| d as u64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ringing_call(caller: UserId, receiver: UserId) -> CallSession {
        CallSession {
            id: CallId::new(),
            caller_id: caller,
            receiver_id: receiver,
            kind: CallKind::Audio,
            state: CallState::Ringing,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            duration_secs: None,
        }
    }

    #[test]
    fn insert_and_fetch_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let call = ringing_call(UserId::new(), UserId::new());

        db.insert_call(&call).unwrap();
        let fetched = db.get_call(call.id).unwrap();

        assert_eq!(fetched.state, CallState::Ringing);
        assert_eq!(fetched.started_at, None);
        assert_eq!(fetched.duration_secs, None);
    }

    #[test]
    fn open_call_lookup_ignores_terminal_sessions() {
        let db = Database::open_in_memory().unwrap();
        let (caller, receiver) = (UserId::new(), UserId::new());

        let mut settled = ringing_call(caller, receiver);
        settled.state = CallState::Rejected;
        settled.ended_at = Some(Utc::now());
        db.insert_call(&settled).unwrap();

        assert!(db
            .find_open_call_for_pair(caller, receiver)
            .unwrap()
            .is_none());

        let open = ringing_call(caller, receiver);
        db.insert_call(&open).unwrap();

        let found = db.find_open_call_for_pair(caller, receiver).unwrap();
        assert_eq!(found.map(|c| c.id), Some(open.id));
    }

    #[test]
    fn settled_history_includes_both_roles() {
        let db = Database::open_in_memory().unwrap();
        let user = UserId::new();
        let peer = UserId::new();

        let mut outgoing = ringing_call(user, peer);
        outgoing.state = CallState::Ended;
        db.insert_call(&outgoing).unwrap();

        let mut incoming = ringing_call(peer, user);
        incoming.state = CallState::Missed;
        db.insert_call(&incoming).unwrap();

        // Still ringing, must not appear in history.
        db.insert_call(&ringing_call(peer, user)).unwrap();

        let history = db.list_settled_calls_for_user(user, 10).unwrap();
        assert_eq!(history.len(), 2);
    }
}
