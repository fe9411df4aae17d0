//! Persistence Gateway seam: what the archive subsystem needs from storage.

use std::collections::HashSet;

use chronicle_shared::{CommunityId, Message, TopicType};
use chronicle_store::{SharedDatabase, StoreError};

pub trait ArchivePersistence: Send + Sync {
    /// Messages on `topics` with `from <= timestamp < to`.
    fn messages_by_topics_and_range(
        &self,
        topics: &[TopicType],
        from: u64,
        to: u64,
    ) -> Result<Vec<Message>, StoreError>;

    fn last_archive_end_date(&self, community: &CommunityId) -> Result<Option<u64>, StoreError>;

    /// Save the cursor, or move it forward if one exists. Never moves it back.
    fn set_archive_end_date(&self, community: &CommunityId, end_date: u64) -> Result<(), StoreError>;

    /// Record archive IDs seen in a community index. Already known IDs keep
    /// their imported flag.
    fn record_archive_ids(&self, community: &CommunityId, archive_ids: &[String]) -> Result<(), StoreError>;

    fn imported_archive_ids(&self, community: &CommunityId) -> Result<HashSet<String>, StoreError>;

    fn mark_archive_imported(&self, community: &CommunityId, archive_id: &str) -> Result<(), StoreError>;
}

impl ArchivePersistence for SharedDatabase {
    fn messages_by_topics_and_range(
        &self,
        topics: &[TopicType],
        from: u64,
        to: u64,
    ) -> Result<Vec<Message>, StoreError> {
        self.lock()?.messages_by_topics_and_range(topics, from, to)
    }

    fn last_archive_end_date(&self, community: &CommunityId) -> Result<Option<u64>, StoreError> {
        self.lock()?.last_archive_end_date(community)
    }

    fn set_archive_end_date(&self, community: &CommunityId, end_date: u64) -> Result<(), StoreError> {
        let db = self.lock()?;
        match db.last_archive_end_date(community)? {
            Some(_) => {
                db.update_last_archive_end_date(community, end_date)?;
            }
            None => db.save_last_archive_end_date(community, end_date)?,
        }
        Ok(())
    }

    fn record_archive_ids(&self, community: &CommunityId, archive_ids: &[String]) -> Result<(), StoreError> {
        let db = self.lock()?;
        for archive_id in archive_ids {
            db.save_archive_id(community, archive_id)?;
        }
        Ok(())
    }

    fn imported_archive_ids(&self, community: &CommunityId) -> Result<HashSet<String>, StoreError> {
        self.lock()?.imported_archive_ids(community)
    }

    fn mark_archive_imported(&self, community: &CommunityId, archive_id: &str) -> Result<(), StoreError> {
        self.lock()?.set_archive_id_imported(community, archive_id, true)
    }
}
