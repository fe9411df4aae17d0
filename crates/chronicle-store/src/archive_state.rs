//! Per-community archive bookkeeping: the resumption cursor and the ledger
//! of archive IDs a node has seen or imported.

use std::collections::HashSet;

use rusqlite::{params, OptionalExtension};

use chronicle_shared::CommunityId;

use crate::database::Database;
use crate::error::Result;

impl Database {
    // ------------------------------------------------------------------
    // Cursor
    // ------------------------------------------------------------------

    /// End date (unix seconds) of the last archive run, if any.
    pub fn last_archive_end_date(&self, community: &CommunityId) -> Result<Option<u64>> {
        let value: Option<i64> = self
            .conn()
            .query_row(
                "SELECT last_message_archive_end_date FROM community_archive_cursor
                 WHERE community_id = ?1",
                params![community.to_hex()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.map(|v| v.max(0) as u64))
    }

    pub fn save_last_archive_end_date(&self, community: &CommunityId, end_date: u64) -> Result<()> {
        self.conn().execute(
            "INSERT INTO community_archive_cursor (community_id, last_message_archive_end_date)
             VALUES (?1, ?2)",
            params![community.to_hex(), to_i64(end_date)],
        )?;
        Ok(())
    }

    /// Move the cursor forward. Returns `false` when no cursor exists or the
    /// stored value is already at or past `end_date`.
    pub fn update_last_archive_end_date(
        &self,
        community: &CommunityId,
        end_date: u64,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE community_archive_cursor SET last_message_archive_end_date = ?2
             WHERE community_id = ?1 AND last_message_archive_end_date < ?2",
            params![community.to_hex(), to_i64(end_date)],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Archive ID ledger
    // ------------------------------------------------------------------

    /// Record an archive ID as known but not yet imported. Existing rows
    /// keep their imported flag.
    pub fn save_archive_id(&self, community: &CommunityId, archive_id: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO community_archive_ids (community_id, archive_id, imported)
             VALUES (?1, ?2, 0)",
            params![community.to_hex(), archive_id],
        )?;
        Ok(())
    }

    pub fn set_archive_id_imported(
        &self,
        community: &CommunityId,
        archive_id: &str,
        imported: bool,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO community_archive_ids (community_id, archive_id, imported)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(community_id, archive_id) DO UPDATE SET imported = excluded.imported",
            params![community.to_hex(), archive_id, imported as i32],
        )?;
        Ok(())
    }

    pub fn imported_archive_ids(&self, community: &CommunityId) -> Result<HashSet<String>> {
        let mut stmt = self.conn().prepare(
            "SELECT archive_id FROM community_archive_ids
             WHERE community_id = ?1 AND imported = 1",
        )?;
        let rows = stmt.query_map(params![community.to_hex()], |row| row.get::<_, String>(0))?;

        let mut ids = HashSet::new();
        for row in rows {
            ids.insert(row?);
        }
        Ok(ids)
    }
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
