//! Archive builder: turns a time range of community messages into padded,
//! content-addressed archives appended to the community data file.
//!
//! A build walks half-open windows `[from, to)` of `partition` seconds.
//! Each non-empty window is split into chunks bounded by
//! `max_archive_size`, every chunk becomes one `Archive` blob, and every
//! blob is padded to the piece length so archives never share a piece.
//! All output is buffered in memory and only written once the whole range
//! has been processed.

use std::sync::Arc;

use tracing::{debug, info, warn};

use chronicle_shared::crypto::archive_hash;
use chronicle_shared::identity::Identity;
use chronicle_shared::protocol::{self, Archive, ArchiveIndexEntry, ArchiveMetadata, ArchivedMessage};
use chronicle_shared::{CommunityId, Message, TopicType};

use crate::error::{ArchiveError, Result};
use crate::file_store::{ArchiveFileStore, CommunityLocks};
use crate::persistence::ArchivePersistence;
use crate::signals::{ArchiveSignal, CommunityPayload, RangePayload, SignalBridge};

/// Where the messages of a build come from.
#[derive(Debug, Clone)]
pub enum MessageSource {
    /// A caller-supplied list, filtered by timestamp per window.
    Explicit(Vec<Message>),
    /// The persistence gateway, queried by topics per window.
    FromStorage,
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub community_id: CommunityId,
    pub source: MessageSource,
    pub topics: Vec<TopicType>,
    /// Unix seconds, inclusive.
    pub start: u64,
    /// Unix seconds, exclusive.
    pub end: u64,
    /// Window length in seconds.
    pub partition: u64,
    pub encrypt: bool,
}

/// Piece-aligned `(size, padding)` for an archive of `raw` bytes.
///
/// Archives longer than one piece are rounded up to the next piece
/// boundary; an exact multiple still gains a whole piece. Shorter archives
/// are padded to exactly one piece.
pub fn piece_aligned(raw: u64, piece_length: u64) -> (u64, u64) {
    if raw > piece_length {
        let size = raw + piece_length - raw % piece_length;
        (size, size - raw)
    } else {
        let padding = piece_length - raw;
        (raw + padding, padding)
    }
}

/// Greedy split on `payload + signature` bytes. A message that exceeds the
/// limit alone is dropped; no empty chunk is returned.
pub fn chunk_messages(messages: Vec<Message>, limit: usize) -> Vec<Vec<Message>> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_size = 0usize;

    for message in messages {
        let size = message.archive_size();
        if size > limit {
            warn!(
                hash = %hex::encode(&message.hash),
                size,
                limit,
                "Message too large for an archive, skipping"
            );
            continue;
        }
        if current_size + size > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += size;
        current.push(message);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

pub struct ArchiveBuilder {
    store: ArchiveFileStore,
    persistence: Arc<dyn ArchivePersistence>,
    signals: SignalBridge,
    identity: Identity,
}

impl ArchiveBuilder {
    /// `identity` signs the transfer descriptors the builder regenerates.
    pub fn new(
        store: ArchiveFileStore,
        persistence: Arc<dyn ArchivePersistence>,
        signals: SignalBridge,
        identity: Identity,
    ) -> Self {
        Self {
            store,
            persistence,
            signals,
            identity,
        }
    }

    pub fn store(&self) -> &ArchiveFileStore {
        &self.store
    }

    pub fn persistence(&self) -> &Arc<dyn ArchivePersistence> {
        &self.persistence
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_from_messages(
        &self,
        community_id: CommunityId,
        messages: Vec<Message>,
        topics: Vec<TopicType>,
        start: u64,
        end: u64,
        partition: u64,
        encrypt: bool,
    ) -> Result<Vec<String>> {
        self.build_archives(BuildRequest {
            community_id,
            source: MessageSource::Explicit(messages),
            topics,
            start,
            end,
            partition,
            encrypt,
        })
    }

    pub fn create_from_storage(
        &self,
        community_id: CommunityId,
        topics: Vec<TopicType>,
        start: u64,
        end: u64,
        partition: u64,
        encrypt: bool,
    ) -> Result<Vec<String>> {
        self.build_archives(BuildRequest {
            community_id,
            source: MessageSource::FromStorage,
            topics,
            start,
            end,
            partition,
            encrypt,
        })
    }

    /// Build archives for `[start, end)` and return the new archive IDs in
    /// creation order. Holds the community lock for the whole call.
    pub fn build_archives(&self, request: BuildRequest) -> Result<Vec<String>> {
        let BuildRequest {
            community_id: community,
            source,
            topics,
            start,
            end,
            partition,
            encrypt,
        } = request;

        if start >= end {
            return Err(ArchiveError::InvalidRequest(format!(
                "start {start} is not before end {end}"
            )));
        }
        if partition == 0 {
            return Err(ArchiveError::InvalidRequest("partition must be positive".into()));
        }

        let config = self.store.config();
        if config.piece_length == 0 {
            return Err(ArchiveError::InvalidRequest("piece length must be positive".into()));
        }
        let lock = self.store.locks().get(&community);
        let _guard = CommunityLocks::acquire(&lock);

        let mut index = self.store.load_index_locked(&community)?;
        let indexed_size = index.total_size();
        let mut offset = indexed_size;

        let mut from = start;
        if let Some(covered) = index.covered_until() {
            if covered > from {
                debug!(community = %community, start, covered, "Skipping range already archived");
                from = covered;
            }
        }

        self.signals
            .publish(ArchiveSignal::CreatingHistoryArchives(CommunityPayload {
                community_id: community.to_hex(),
            }));

        let explicit = match source {
            MessageSource::Explicit(messages) => Some(messages),
            MessageSource::FromStorage => None,
        };
        let content_topic: Vec<Vec<u8>> = topics.iter().map(|t| t.to_vec()).collect();

        let mut buffer: Vec<u8> = Vec::new();
        let mut archive_ids = Vec::new();
        let mut to = from.saturating_add(partition).min(end);

        while from < end {
            let messages: Vec<Message> = match &explicit {
                Some(all) => all
                    .iter()
                    .filter(|m| {
                        let ts = u64::from(m.timestamp);
                        ts >= from && ts < to
                    })
                    .cloned()
                    .collect(),
                None => self.persistence.messages_by_topics_and_range(&topics, from, to)?,
            };

            if messages.is_empty() {
                debug!(community = %community, from, to, "No messages in window");
            } else {
                debug!(community = %community, from, to, messages = messages.len(), "Archiving window");

                for chunk in chunk_messages(messages, config.max_archive_size) {
                    let metadata = ArchiveMetadata {
                        from,
                        to,
                        content_topic: content_topic.clone(),
                    };
                    let archive = Archive {
                        metadata: Some(metadata.clone()),
                        messages: chunk.iter().map(ArchivedMessage::from).collect(),
                    };

                    let raw = self.store.seal(&community, protocol::encode(&archive), encrypt)?;
                    let (size, padding) = piece_aligned(raw.len() as u64, config.piece_length);

                    let entry = ArchiveIndexEntry {
                        metadata: Some(metadata),
                        offset,
                        size,
                        padding,
                    };
                    let archive_id = archive_hash(&protocol::encode(&entry));

                    debug!(
                        community = %community,
                        archive_id = %archive_id,
                        offset,
                        size,
                        messages = chunk.len(),
                        "Archive chunk built"
                    );

                    buffer.extend_from_slice(&raw);
                    buffer.resize(buffer.len() + padding as usize, 0);
                    offset += size;

                    index.archives.insert(archive_id.clone(), entry);
                    archive_ids.push(archive_id);
                }
            }

            from = to;
            to = to.saturating_add(partition).min(end);
        }

        if archive_ids.is_empty() {
            info!(community = %community, start, end, "No history archives created");
            self.signals
                .publish(ArchiveSignal::NoHistoryArchivesCreated(RangePayload {
                    community_id: community.to_hex(),
                    from: start,
                    to: end,
                }));
        } else {
            // data before index, so the index never points past the file
            self.store.truncate_data_locked(&community, indexed_size)?;
            self.store.append_data_locked(&community, &buffer)?;
            let index_bytes = self.store.seal(&community, protocol::encode(&index), encrypt)?;
            self.store.write_index_locked(&community, &index_bytes)?;
            self.store
                .regenerate_descriptor_locked(&community, &self.identity)?;

            info!(
                community = %community,
                archives = archive_ids.len(),
                bytes = buffer.len(),
                start,
                end,
                "History archives created"
            );
            self.signals
                .publish(ArchiveSignal::HistoryArchivesCreated(RangePayload {
                    community_id: community.to_hex(),
                    from: start,
                    to: end,
                }));
        }

        self.persistence.set_archive_end_date(&community, from)?;

        Ok(archive_ids)
    }
}
