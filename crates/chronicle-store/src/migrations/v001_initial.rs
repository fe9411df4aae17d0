//! v001 -- Raw message history.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    hash           BLOB PRIMARY KEY NOT NULL,  -- envelope hash, dedup key
    sig            BLOB NOT NULL,
    timestamp      INTEGER NOT NULL,           -- unix seconds
    topic          BLOB NOT NULL,              -- 4-byte content topic
    payload        BLOB NOT NULL,
    padding        BLOB NOT NULL,
    third_party_id TEXT
);

CREATE INDEX IF NOT EXISTS idx_messages_topic_ts
    ON messages(topic, timestamp);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
