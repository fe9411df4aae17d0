//! Receiving side: replay archives a node has downloaded into its own
//! message store.

use std::sync::Arc;

use tracing::{debug, info};

use chronicle_shared::{CommunityId, Message};

use crate::error::{ArchiveError, Result};
use crate::file_store::ArchiveFileStore;
use crate::persistence::ArchivePersistence;
use crate::signals::{ArchiveSignal, CommunityPayload, ImportedPayload, SignalBridge};

pub struct ArchiveImporter {
    store: ArchiveFileStore,
    persistence: Arc<dyn ArchivePersistence>,
    signals: SignalBridge,
}

impl ArchiveImporter {
    pub fn new(
        store: ArchiveFileStore,
        persistence: Arc<dyn ArchivePersistence>,
        signals: SignalBridge,
    ) -> Self {
        Self {
            store,
            persistence,
            signals,
        }
    }

    /// IDs in the community index that have not been imported yet, oldest
    /// window first.
    pub fn archive_ids_to_import(&self, community: &CommunityId) -> Result<Vec<String>> {
        let index = self.store.load_index(community)?;
        let all: Vec<String> = index.archives.keys().cloned().collect();
        self.persistence.record_archive_ids(community, &all)?;

        let imported = self.persistence.imported_archive_ids(community)?;
        let mut pending: Vec<(u64, u64, String)> = index
            .archives
            .into_iter()
            .filter(|(id, _)| !imported.contains(id))
            .map(|(id, entry)| (entry.from_ts(), entry.offset, id))
            .collect();
        pending.sort();

        Ok(pending.into_iter().map(|(_, _, id)| id).collect())
    }

    /// Hand every pending archive to `handler` in order and mark it
    /// imported once the handler accepts it. Returns how many archives were
    /// imported. A failing archive stops the run; earlier ones stay marked.
    pub fn import_archives<F, E>(&self, community: &CommunityId, mut handler: F) -> Result<usize>
    where
        F: FnMut(&str, Vec<Message>) -> std::result::Result<(), E>,
        E: std::fmt::Display,
    {
        let pending = self.archive_ids_to_import(community)?;
        if pending.is_empty() {
            debug!(community = %community, "No history archives to import");
            self.signals
                .publish(ArchiveSignal::NoHistoryArchivesImported(CommunityPayload {
                    community_id: community.to_hex(),
                }));
            return Ok(0);
        }

        self.signals
            .publish(ArchiveSignal::ImportingHistoryArchiveMessages(CommunityPayload {
                community_id: community.to_hex(),
            }));

        let mut count = 0;
        for archive_id in &pending {
            let messages = self.store.extract_messages(community, archive_id)?;
            debug!(
                community = %community,
                archive_id = %archive_id,
                messages = messages.len(),
                "Importing archive"
            );

            handler(archive_id, messages).map_err(|e| ArchiveError::Import {
                archive_id: archive_id.clone(),
                reason: e.to_string(),
            })?;
            self.persistence.mark_archive_imported(community, archive_id)?;
            count += 1;
        }

        info!(community = %community, archives = count, "History archives imported");
        self.signals
            .publish(ArchiveSignal::HistoryArchivesImported(ImportedPayload {
                community_id: community.to_hex(),
                count,
            }));
        Ok(count)
    }
}
