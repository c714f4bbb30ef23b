//! v001 -- Initial schema creation.
//!
//! Creates the five core tables: `conversations`, `participants`,
//! `messages`, `calls`, and `notifications`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    kind            TEXT NOT NULL,              -- 'direct' | 'group'
    name            TEXT,                       -- group conversations only
    created_by      TEXT NOT NULL,              -- creator user id
    archived        INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    last_seq        INTEGER NOT NULL DEFAULT 0, -- last allocated message sequence
    created_at      TEXT NOT NULL,              -- ISO-8601 / RFC-3339
    last_message_at TEXT NOT NULL               -- denormalized for list sorting
);

-- ----------------------------------------------------------------
-- Participants (membership rows, one per (conversation, user))
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS participants (
    conversation_id TEXT NOT NULL,              -- FK -> conversations(id)
    user_id         TEXT NOT NULL,
    joined_at       TEXT NOT NULL,
    last_read_seq   INTEGER,                    -- NULL until the first read

    PRIMARY KEY (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_participants_user ON participants(user_id);

-- ----------------------------------------------------------------
-- Messages (append-only, totally ordered per conversation by seq)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    conversation_id TEXT NOT NULL,              -- FK -> conversations(id)
    sender_id       TEXT NOT NULL,
    seq             INTEGER NOT NULL,           -- per-conversation, starts at 1
    content         TEXT,                       -- NULL for attachment-only
    attachment_url  TEXT,
    attachment_kind TEXT,                       -- 'image'|'video'|'audio'|'file'
    reply_to        TEXT,                       -- optional FK -> messages(id)
    created_at      TEXT NOT NULL,

    UNIQUE (conversation_id, seq),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_seq
    ON messages(conversation_id, seq);

-- ----------------------------------------------------------------
-- Call sessions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS calls (
    id            TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    caller_id     TEXT NOT NULL,
    receiver_id   TEXT NOT NULL,
    kind          TEXT NOT NULL,                -- 'audio' | 'video'
    state         TEXT NOT NULL,                -- see CallState
    created_at    TEXT NOT NULL,
    started_at    TEXT,                         -- set on accept
    ended_at      TEXT,                         -- set on terminal transition
    duration_secs INTEGER                       -- server-computed on end
);

CREATE INDEX IF NOT EXISTS idx_calls_pair_state
    ON calls(caller_id, receiver_id, state);

-- ----------------------------------------------------------------
-- Notifications (server-generated, drained by external transports)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS notifications (
    id           TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    recipient_id TEXT NOT NULL,
    kind         TEXT NOT NULL,                 -- see NotificationKind
    title        TEXT NOT NULL,
    body         TEXT NOT NULL,
    read         INTEGER NOT NULL DEFAULT 0,    -- boolean 0/1, false -> true only
    payload      TEXT,                          -- JSON deep-link payload
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notifications_recipient_read
    ON notifications(recipient_id, read);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
