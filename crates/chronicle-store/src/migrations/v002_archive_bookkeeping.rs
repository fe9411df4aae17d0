//! v002 -- Per-community archive cursor and archive ID ledger.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS community_archive_cursor (
    community_id           TEXT PRIMARY KEY NOT NULL,  -- hex community pubkey
    last_message_archive_end_date INTEGER NOT NULL     -- unix seconds
);

CREATE TABLE IF NOT EXISTS community_archive_ids (
    community_id TEXT NOT NULL,
    archive_id   TEXT NOT NULL,
    imported     INTEGER NOT NULL DEFAULT 0,           -- boolean 0/1
    PRIMARY KEY (community_id, archive_id)
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
