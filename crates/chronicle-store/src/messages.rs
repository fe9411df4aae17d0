use rusqlite::{params, params_from_iter, types::Value};

use chronicle_shared::{Message, TopicType};

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Store a raw message. Re-inserting the same hash is a no-op; returns
    /// whether a row was written.
    pub fn insert_message(&self, message: &Message) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO messages (hash, sig, timestamp, topic, payload, padding, third_party_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.hash,
                message.signature,
                message.timestamp,
                message.topic.to_vec(),
                message.payload,
                message.padding,
                message.third_party_id,
            ],
        )?;
        Ok(affected > 0)
    }

    /// Messages on any of `topics` with `from <= timestamp < to`, oldest first.
    pub fn messages_by_topics_and_range(
        &self,
        topics: &[TopicType],
        from: u64,
        to: u64,
    ) -> Result<Vec<Message>> {
        if topics.is_empty() || from >= to {
            return Ok(Vec::new());
        }

        let placeholders = (0..topics.len())
            .map(|i| format!("?{}", i + 3))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT hash, sig, timestamp, topic, payload, padding, third_party_id
             FROM messages
             WHERE timestamp >= ?1 AND timestamp < ?2 AND topic IN ({placeholders})
             ORDER BY timestamp ASC, hash ASC"
        );

        let mut values: Vec<Value> = Vec::with_capacity(topics.len() + 2);
        values.push(Value::Integer(clamp_i64(from)));
        values.push(Value::Integer(clamp_i64(to)));
        values.extend(topics.iter().map(|t| Value::Blob(t.to_vec())));

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), row_to_parts)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(parts_to_message(row?)?);
        }
        Ok(messages)
    }
}

fn clamp_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

struct MessageRow {
    hash: Vec<u8>,
    sig: Vec<u8>,
    timestamp: i64,
    topic: Vec<u8>,
    payload: Vec<u8>,
    padding: Vec<u8>,
    third_party_id: Option<String>,
}

fn row_to_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        hash: row.get(0)?,
        sig: row.get(1)?,
        timestamp: row.get(2)?,
        topic: row.get(3)?,
        payload: row.get(4)?,
        padding: row.get(5)?,
        third_party_id: row.get(6)?,
    })
}

fn parts_to_message(row: MessageRow) -> Result<Message> {
    let timestamp = u32::try_from(row.timestamp).map_err(|_| {
        StoreError::CorruptRow(chronicle_shared::SharedError::Serialization(format!(
            "timestamp out of range: {}",
            row.timestamp
        )))
    })?;

    Ok(Message {
        signature: row.sig,
        timestamp,
        topic: TopicType::from_slice(&row.topic)?,
        payload: row.payload,
        padding: row.padding,
        hash: row.hash,
        third_party_id: row.third_party_id,
    })
}
