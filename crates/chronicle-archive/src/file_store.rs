//! On-disk layout of community archives.
//!
//! ```text
//! <data_dir>/<community>/index      ArchiveIndex (or EncryptedEnvelope)
//! <data_dir>/<community>/data       concatenated padded archives
//! <torrent_dir>/<community>.torrent TransferDescriptor
//! ```
//!
//! Public methods take the community lock themselves. The `*_locked`
//! variants expect the caller to already hold it (see [`CommunityLocks`]).

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use chronicle_shared::identity::Identity;
use chronicle_shared::protocol::{self, Archive, ArchiveIndex};
use chronicle_shared::{CommunityId, Encryptor, Message};

use crate::config::ArchiveConfig;
use crate::descriptor::TransferDescriptor;
use crate::error::{ArchiveError, Result};

/// Per-community mutual exclusion for index, data and descriptor files.
#[derive(Default)]
pub struct CommunityLocks {
    locks: Mutex<HashMap<CommunityId, Arc<Mutex<()>>>>,
}

impl CommunityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock of one community, created on first use.
    pub fn get(&self, community: &CommunityId) -> Arc<Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(*community).or_default().clone()
    }

    /// Block until the lock is held. A poisoned lock is taken over: the
    /// files it guards are rewritten atomically per call.
    pub fn acquire(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
        match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Owns archive files of every community under the configured roots.
#[derive(Clone)]
pub struct ArchiveFileStore {
    config: Arc<ArchiveConfig>,
    encryptor: Option<Arc<dyn Encryptor>>,
    locks: Arc<CommunityLocks>,
}

impl ArchiveFileStore {
    pub fn new(config: ArchiveConfig, encryptor: Option<Arc<dyn Encryptor>>) -> Self {
        Self {
            config: Arc::new(config),
            encryptor,
            locks: Arc::new(CommunityLocks::new()),
        }
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    pub fn locks(&self) -> &CommunityLocks {
        &self.locks
    }

    // ------------------------------------------------------------------
    // Paths
    // ------------------------------------------------------------------

    pub fn archive_dir(&self, community: &CommunityId) -> PathBuf {
        self.config.data_dir.join(community.to_hex())
    }

    pub fn index_path(&self, community: &CommunityId) -> PathBuf {
        self.archive_dir(community).join("index")
    }

    pub fn data_path(&self, community: &CommunityId) -> PathBuf {
        self.archive_dir(community).join("data")
    }

    pub fn descriptor_path(&self, community: &CommunityId) -> PathBuf {
        self.config
            .torrent_dir
            .join(format!("{}.torrent", community.to_hex()))
    }

    // ------------------------------------------------------------------
    // Index
    // ------------------------------------------------------------------

    /// Load a community index. A missing file reads as an empty index.
    pub fn load_index(&self, community: &CommunityId) -> Result<ArchiveIndex> {
        let lock = self.locks.get(community);
        let _guard = CommunityLocks::acquire(&lock);
        self.load_index_locked(community)
    }

    pub fn load_index_locked(&self, community: &CommunityId) -> Result<ArchiveIndex> {
        let path = self.index_path(community);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ArchiveIndex::default());
            }
            Err(e) => return Err(e.into()),
        };
        self.parse_with_fallback(community, &bytes, ArchiveIndex::is_empty)
    }

    /// Replace the index file with `bytes`.
    pub fn write_index(&self, community: &CommunityId, bytes: &[u8]) -> Result<()> {
        let lock = self.locks.get(community);
        let _guard = CommunityLocks::acquire(&lock);
        self.write_index_locked(community, bytes)
    }

    pub fn write_index_locked(&self, community: &CommunityId, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(self.archive_dir(community))?;
        fs::write(self.index_path(community), bytes)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Data
    // ------------------------------------------------------------------

    /// Append to the data file, creating it if needed.
    pub fn append_data(&self, community: &CommunityId, bytes: &[u8]) -> Result<()> {
        let lock = self.locks.get(community);
        let _guard = CommunityLocks::acquire(&lock);
        self.append_data_locked(community, bytes)
    }

    pub fn append_data_locked(&self, community: &CommunityId, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(self.archive_dir(community))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.data_path(community))?;
        file.write_all(bytes)?;
        file.sync_data()?;
        Ok(())
    }

    /// Cut the data file back to `len` bytes. Bytes past the indexed size are
    /// left over from a build that failed before its index was written.
    pub fn truncate_data_locked(&self, community: &CommunityId, len: u64) -> Result<()> {
        let path = self.data_path(community);
        let current = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if current > len {
            warn!(
                community = %community,
                stray = current - len,
                "Dropping unindexed bytes from data file"
            );
            OpenOptions::new().write(true).open(&path)?.set_len(len)?;
        }
        Ok(())
    }

    /// Read one archive back out of the data file.
    pub fn extract_messages(&self, community: &CommunityId, archive_id: &str) -> Result<Vec<Message>> {
        let lock = self.locks.get(community);
        let _guard = CommunityLocks::acquire(&lock);

        let index = self.load_index_locked(community)?;
        let entry = index
            .archives
            .get(archive_id)
            .ok_or_else(|| ArchiveError::ArchiveNotFound {
                community: community.to_hex(),
                archive_id: archive_id.to_string(),
            })?;

        let mut file = fs::File::open(self.data_path(community))?;
        file.seek(SeekFrom::Start(entry.offset))?;
        let len = usize::try_from(entry.raw_len()).map_err(|_| ArchiveError::Corrupt {
            community: community.to_hex(),
            reason: format!("archive {archive_id} length does not fit in memory"),
        })?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;

        debug!(
            community = %community,
            archive_id,
            offset = entry.offset,
            size = entry.size,
            "Extracting archive"
        );

        let archive = self.parse_with_fallback(community, &buf, |a: &Archive| {
            a.metadata.is_none() && a.messages.is_empty()
        })?;

        archive
            .messages
            .into_iter()
            .map(|m| Message::try_from(m).map_err(ArchiveError::from))
            .collect()
    }

    // ------------------------------------------------------------------
    // Descriptor
    // ------------------------------------------------------------------

    /// Rebuild and store the descriptor over the community archive directory.
    pub fn regenerate_descriptor_locked(
        &self,
        community: &CommunityId,
        identity: &Identity,
    ) -> Result<TransferDescriptor> {
        let descriptor = TransferDescriptor::create(
            &self.config,
            &community.to_hex(),
            &self.archive_dir(community),
            identity,
        )?;
        fs::create_dir_all(&self.config.torrent_dir)?;
        descriptor.save(&self.descriptor_path(community))?;
        Ok(descriptor)
    }

    pub fn load_descriptor(&self, community: &CommunityId) -> Result<TransferDescriptor> {
        let lock = self.locks.get(community);
        let _guard = CommunityLocks::acquire(&lock);
        self.load_descriptor_locked(community)
    }

    fn load_descriptor_locked(&self, community: &CommunityId) -> Result<TransferDescriptor> {
        let path = self.descriptor_path(community);
        if !path.exists() {
            return Err(ArchiveError::DescriptorNotFound(community.to_hex()));
        }
        TransferDescriptor::load(&path)
    }

    /// Load the stored descriptor, rebuilding it when missing but archive
    /// data exists.
    pub fn load_or_create_descriptor(
        &self,
        community: &CommunityId,
        identity: &Identity,
    ) -> Result<TransferDescriptor> {
        let lock = self.locks.get(community);
        let _guard = CommunityLocks::acquire(&lock);

        match self.load_descriptor_locked(community) {
            Err(ArchiveError::DescriptorNotFound(_)) if self.data_path(community).exists() => {
                warn!(community = %community, "Descriptor missing, rebuilding");
                self.regenerate_descriptor_locked(community, identity)
            }
            other => other,
        }
    }

    // ------------------------------------------------------------------
    // Encryption
    // ------------------------------------------------------------------

    /// Encode `plain` for disk: unchanged, or wrapped in an envelope.
    pub fn seal(&self, community: &CommunityId, plain: Vec<u8>, encrypt: bool) -> Result<Vec<u8>> {
        if !encrypt {
            return Ok(plain);
        }
        let encryptor = self
            .encryptor
            .as_ref()
            .ok_or(ArchiveError::EncryptionUnavailable)?;
        let envelope = encryptor.encrypt(community, &plain)?;
        Ok(protocol::encode(&envelope))
    }

    /// Plain parse first; when that fails or yields an empty value from
    /// non-empty bytes, treat the bytes as an envelope and decrypt.
    fn parse_with_fallback<M, F>(&self, community: &CommunityId, bytes: &[u8], is_empty: F) -> Result<M>
    where
        M: prost::Message + Default,
        F: Fn(&M) -> bool,
    {
        let plain_err = match M::decode(bytes) {
            Ok(value) if bytes.is_empty() || !is_empty(&value) => return Ok(value),
            Ok(_) => None,
            Err(e) => Some(e),
        };

        let corrupt = |reason: String| ArchiveError::Corrupt {
            community: community.to_hex(),
            reason,
        };

        let envelope = match protocol::decode_envelope(bytes) {
            Ok(envelope) if !envelope.is_empty() => envelope,
            Ok(_) => {
                return Err(corrupt(match plain_err {
                    Some(e) => format!("not an archive or envelope: {e}"),
                    None => "neither plain content nor an envelope".to_string(),
                }))
            }
            Err(e) => return Err(corrupt(format!("envelope decode failed: {e}"))),
        };

        let encryptor = self
            .encryptor
            .as_ref()
            .ok_or(ArchiveError::EncryptionUnavailable)?;
        let plain = encryptor.decrypt(community, &envelope)?;
        M::decode(plain.as_slice()).map_err(|e| corrupt(format!("decrypted content invalid: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;
    use chronicle_shared::protocol::{ArchiveIndexEntry, ArchiveMetadata, ArchivedMessage};
    use chronicle_shared::{HashRatchetEncryptor, TopicType};

    fn community() -> CommunityId {
        CommunityId([9u8; 32])
    }

    fn store(dir: &tempfile::TempDir, encrypted: bool) -> ArchiveFileStore {
        let encryptor: Option<Arc<dyn Encryptor>> = if encrypted {
            let enc = HashRatchetEncryptor::new([1u8; 32]);
            enc.add_community(community(), b"secret");
            Some(Arc::new(enc))
        } else {
            None
        };
        ArchiveFileStore::new(ArchiveConfig::with_root(dir.path()), encryptor)
    }

    fn sample_index() -> ArchiveIndex {
        let mut index = ArchiveIndex::default();
        index.archives.insert(
            "abc".into(),
            ArchiveIndexEntry {
                metadata: Some(ArchiveMetadata {
                    from: 10,
                    to: 20,
                    content_topic: vec![vec![1, 2, 3, 4]],
                }),
                offset: 0,
                size: 100,
                padding: 10,
            },
        );
        index
    }

    #[test]
    fn test_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, false);
        let hex = community().to_hex();
        assert_eq!(store.index_path(&community()), dir.path().join("archivedata").join(&hex).join("index"));
        assert_eq!(store.data_path(&community()), dir.path().join("archivedata").join(&hex).join("data"));
        assert_eq!(
            store.descriptor_path(&community()),
            dir.path().join("torrents").join(format!("{hex}.torrent"))
        );
    }

    #[test]
    fn test_missing_index_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(&dir, false).load_index(&community()).unwrap().is_empty());
    }

    #[test]
    fn test_plain_index_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, false);
        store.write_index(&community(), &protocol::encode(&sample_index())).unwrap();
        assert_eq!(store.load_index(&community()).unwrap(), sample_index());
    }

    #[test]
    fn test_encrypted_index_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, true);
        let sealed = store
            .seal(&community(), protocol::encode(&sample_index()), true)
            .unwrap();
        store.write_index(&community(), &sealed).unwrap();

        let on_disk = fs::read(store.index_path(&community())).unwrap();
        assert!(ArchiveIndex::decode(on_disk.as_slice()).unwrap().is_empty());
        assert_eq!(store.load_index(&community()).unwrap(), sample_index());
    }

    #[test]
    fn test_encrypted_index_without_encryptor() {
        let dir = tempfile::tempdir().unwrap();
        let writer = store(&dir, true);
        let sealed = writer
            .seal(&community(), protocol::encode(&sample_index()), true)
            .unwrap();
        writer.write_index(&community(), &sealed).unwrap();

        let reader = store(&dir, false);
        assert!(matches!(
            reader.load_index(&community()),
            Err(ArchiveError::EncryptionUnavailable)
        ));
    }

    #[test]
    fn test_garbage_index_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, true);
        store.write_index(&community(), &[0xff, 0xff, 0xff, 0xff]).unwrap();
        assert!(matches!(
            store.load_index(&community()),
            Err(ArchiveError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_seal_without_encryptor_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            store(&dir, false).seal(&community(), vec![1, 2, 3], true),
            Err(ArchiveError::EncryptionUnavailable)
        ));
    }

    #[test]
    fn test_append_and_extract() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, false);

        let archive = Archive {
            metadata: Some(ArchiveMetadata {
                from: 0,
                to: 100,
                content_topic: vec![vec![1, 2, 3, 4]],
            }),
            messages: vec![ArchivedMessage {
                sig: vec![1; 65],
                timestamp: 50,
                topic: vec![1, 2, 3, 4],
                payload: b"hello".to_vec(),
                padding: vec![],
                hash: vec![2; 32],
                third_party_id: String::new(),
            }],
        };
        let raw = protocol::encode(&archive);
        let mut blob = raw.clone();
        blob.extend(std::iter::repeat(0u8).take(16));

        // something already in the file before our archive
        store.append_data(&community(), &[7u8; 32]).unwrap();
        store.append_data(&community(), &blob).unwrap();

        let mut index = ArchiveIndex::default();
        index.archives.insert(
            "id".into(),
            ArchiveIndexEntry {
                metadata: archive.metadata.clone(),
                offset: 32,
                size: blob.len() as u64,
                padding: 16,
            },
        );
        store.write_index(&community(), &protocol::encode(&index)).unwrap();

        let messages = store.extract_messages(&community(), "id").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, b"hello");
        assert_eq!(messages[0].topic, TopicType([1, 2, 3, 4]));

        assert!(matches!(
            store.extract_messages(&community(), "missing"),
            Err(ArchiveError::ArchiveNotFound { .. })
        ));
    }

    #[test]
    fn test_locks_are_per_community() {
        let locks = CommunityLocks::new();
        let a = locks.get(&CommunityId([1u8; 32]));
        let a_again = locks.get(&CommunityId([1u8; 32]));
        let b = locks.get(&CommunityId([2u8; 32]));
        assert!(Arc::ptr_eq(&a, &a_again));
        assert!(!Arc::ptr_eq(&a, &b));

        let _held = CommunityLocks::acquire(&a);
        assert!(b.try_lock().is_ok());
        assert!(a_again.try_lock().is_err());
    }
}
