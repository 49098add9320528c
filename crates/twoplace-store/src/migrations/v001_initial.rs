//! v001 -- Initial schema creation.
//!
//! Creates `users`, `friends`, `friend_requests`, `calls` and
//! `call_candidates`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    uid          TEXT PRIMARY KEY NOT NULL,
    username     TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    photo_url    TEXT,
    created_at   TEXT NOT NULL                -- RFC-3339
);

-- ----------------------------------------------------------------
-- Friendships (one row per direction)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS friends (
    user_uid   TEXT NOT NULL,
    friend_uid TEXT NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (user_uid, friend_uid),
    FOREIGN KEY (user_uid) REFERENCES users(uid) ON DELETE CASCADE,
    FOREIGN KEY (friend_uid) REFERENCES users(uid) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Friend requests, keyed "{from_uid}_{to_uid}"
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS friend_requests (
    id        TEXT PRIMARY KEY NOT NULL,
    from_uid  TEXT NOT NULL,
    from_name TEXT NOT NULL,
    to_uid    TEXT NOT NULL,
    to_name   TEXT NOT NULL,
    status    TEXT NOT NULL,                  -- pending | accepted | rejected
    sent_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_friend_requests_to
    ON friend_requests(to_uid, status);

-- ----------------------------------------------------------------
-- Calls
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS calls (
    id                  TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    caller_uid          TEXT NOT NULL,
    callee_uid          TEXT NOT NULL,
    started_at          TEXT NOT NULL,
    accepted            INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    accepted_at         TEXT,
    offer               TEXT,                       -- JSON {type, sdp}
    answer              TEXT,                       -- JSON {type, sdp}
    ended_at            TEXT,
    was_auto_ended      INTEGER,
    bytes_sent          INTEGER,
    bytes_received      INTEGER,
    sleep_timer_minutes INTEGER
);

CREATE INDEX IF NOT EXISTS idx_calls_callee_open
    ON calls(callee_uid, accepted, ended_at);
CREATE INDEX IF NOT EXISTS idx_calls_started ON calls(started_at DESC);

-- ----------------------------------------------------------------
-- Candidate subcollections, append-only
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS call_candidates (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    call_id    TEXT NOT NULL,
    role       TEXT NOT NULL,                   -- caller | callee
    payload    TEXT NOT NULL,                   -- JSON candidate init
    created_at TEXT NOT NULL,

    FOREIGN KEY (call_id) REFERENCES calls(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_call_candidates_call
    ON call_candidates(call_id, role, seq);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
