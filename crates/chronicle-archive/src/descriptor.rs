//! Transfer descriptor: what the swarm engine needs to seed a community's
//! archive directory.

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use chronicle_shared::identity::{verify_signature, Identity};
use chronicle_shared::{IdentityError, SharedError};

use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, EngineError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the descriptor root.
    pub path: String,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorInfo {
    pub name: String,
    pub piece_length: u64,
    /// Sorted by path; pieces run over the files in this order.
    pub files: Vec<FileEntry>,
    pub pieces: Vec<[u8; 32]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDescriptor {
    pub announce_list: Vec<String>,
    /// Hex public key of the node that built the descriptor.
    pub created_by: String,
    /// Unix seconds
    pub creation_date: i64,
    pub info: DescriptorInfo,
    /// Ed25519 signature by `created_by` over the info hash.
    pub signature: Vec<u8>,
}

impl DescriptorInfo {
    /// Hash every regular file directly under `dir`.
    pub fn from_dir(name: &str, dir: &Path, piece_length: u64) -> std::io::Result<Self> {
        let files = list_files(dir)?;
        let pieces = hash_pieces(dir, &files, piece_length)?;
        Ok(Self {
            name: name.to_string(),
            piece_length,
            files,
            pieces,
        })
    }

    pub fn total_length(&self) -> u64 {
        self.files.iter().map(|f| f.length).sum()
    }

    /// BLAKE3 over the bincode encoding of the info section.
    pub fn info_hash(&self) -> Result<String> {
        let encoded = bincode::serialize(self)?;
        Ok(blake3::hash(&encoded).to_hex().to_string())
    }

    /// Re-hash the files under `dir` and compare against the recorded pieces.
    pub fn verify(&self, dir: &Path) -> std::result::Result<(), EngineError> {
        for file in &self.files {
            let path = dir.join(&file.path);
            let meta = fs::metadata(&path)
                .map_err(|_| EngineError::MissingData(path.display().to_string()))?;
            if meta.len() < file.length {
                return Err(EngineError::MissingData(format!(
                    "{} is {} bytes, expected {}",
                    path.display(),
                    meta.len(),
                    file.length
                )));
            }
        }

        let actual = hash_pieces(dir, &self.files, self.piece_length)?;
        if actual.len() != self.pieces.len() {
            return Err(EngineError::PieceMismatch {
                name: self.name.clone(),
                index: actual.len().min(self.pieces.len()),
            });
        }
        if let Some(index) = actual.iter().zip(&self.pieces).position(|(a, b)| a != b) {
            return Err(EngineError::PieceMismatch {
                name: self.name.clone(),
                index,
            });
        }
        Ok(())
    }
}

impl TransferDescriptor {
    pub fn create(config: &ArchiveConfig, name: &str, dir: &Path, identity: &Identity) -> Result<Self> {
        let info = DescriptorInfo::from_dir(name, dir, config.piece_length)?;
        let signature = identity.sign(info.info_hash()?.as_bytes()).to_bytes().to_vec();
        Ok(Self {
            announce_list: config.announce_list.clone(),
            created_by: identity.public_key_hex(),
            creation_date: chrono::Utc::now().timestamp(),
            info,
            signature,
        })
    }

    pub fn info_hash(&self) -> Result<String> {
        self.info.info_hash()
    }

    /// Check that `created_by` signed this info section.
    pub fn verify_signature(&self) -> Result<()> {
        let pubkey: [u8; 32] = hex::decode(&self.created_by)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(SharedError::Identity(IdentityError::InvalidKeyBytes))?;
        verify_signature(&pubkey, self.info_hash()?.as_bytes(), &self.signature)
            .map_err(SharedError::from)?;
        Ok(())
    }

    /// `magnet:?xt=urn:btmh:<info hash>&dn=<name>&tr=<tracker>...`
    pub fn magnet(&self) -> Result<String> {
        let mut uri = format!(
            "magnet:?xt=urn:btmh:{}&dn={}",
            self.info_hash()?,
            percent_encode(&self.info.name)
        );
        for tracker in &self.announce_list {
            uri.push_str("&tr=");
            uri.push_str(&percent_encode(tracker));
        }
        Ok(uri)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = bincode::serialize(self)?;
        fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        bincode::deserialize(&bytes).map_err(ArchiveError::from)
    }
}

fn list_files(dir: &Path) -> std::io::Result<Vec<FileEntry>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        files.push(FileEntry {
            path: entry.file_name().to_string_lossy().into_owned(),
            length: meta.len(),
        });
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Pieces span file boundaries; only the final piece may be short.
fn hash_pieces(dir: &Path, files: &[FileEntry], piece_length: u64) -> std::io::Result<Vec<[u8; 32]>> {
    let piece_length = usize::try_from(piece_length.max(1)).unwrap_or(usize::MAX);
    let mut pieces = Vec::new();
    let mut piece = Vec::with_capacity(piece_length);
    let mut buf = vec![0u8; 64 * 1024];

    for file in files {
        // read exactly the recorded length; bytes appended later are not part of it
        let mut reader = fs::File::open(dir.join(&file.path))?.take(file.length);
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            let mut chunk = &buf[..n];
            while !chunk.is_empty() {
                let take = (piece_length - piece.len()).min(chunk.len());
                piece.extend_from_slice(&chunk[..take]);
                chunk = &chunk[take..];
                if piece.len() == piece_length {
                    pieces.push(*blake3::hash(&piece).as_bytes());
                    piece.clear();
                }
            }
        }
    }
    if !piece.is_empty() {
        pieces.push(*blake3::hash(&piece).as_bytes());
    }
    Ok(pieces)
}

fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_dir(dir: &Path) {
        fs::write(dir.join("data"), vec![1u8; 250]).unwrap();
        fs::write(dir.join("index"), vec![2u8; 30]).unwrap();
    }

    #[test]
    fn test_pieces_span_files() {
        let dir = tempfile::tempdir().unwrap();
        write_dir(dir.path());

        let info = DescriptorInfo::from_dir("c", dir.path(), 100).unwrap();
        assert_eq!(info.files.len(), 2);
        assert_eq!(info.files[0].path, "data");
        assert_eq!(info.total_length(), 280);
        // 280 bytes over 100-byte pieces
        assert_eq!(info.pieces.len(), 3);

        let mut third = vec![1u8; 50];
        third.extend(vec![2u8; 30]);
        assert_eq!(info.pieces[2], *blake3::hash(&third).as_bytes());
    }

    #[test]
    fn test_verify_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        write_dir(dir.path());
        let info = DescriptorInfo::from_dir("c", dir.path(), 100).unwrap();
        assert!(info.verify(dir.path()).is_ok());

        let mut data = vec![1u8; 250];
        data[120] = 9;
        fs::write(dir.path().join("data"), data).unwrap();
        assert!(matches!(
            info.verify(dir.path()),
            Err(EngineError::PieceMismatch { index: 1, .. })
        ));

        fs::remove_file(dir.path().join("index")).unwrap();
        assert!(matches!(info.verify(dir.path()), Err(EngineError::MissingData(_))));
    }

    #[test]
    fn test_save_load_and_magnet() {
        let dir = tempfile::tempdir().unwrap();
        write_dir(dir.path());
        let mut config = ArchiveConfig::with_root(dir.path());
        config.announce_list = vec!["udp://tracker.example:1337/announce".into()];

        let descriptor =
            TransferDescriptor::create(&config, "my community", dir.path(), &Identity::generate()).unwrap();
        let path = dir.path().join("c.torrent");
        descriptor.save(&path).unwrap();
        let loaded = TransferDescriptor::load(&path).unwrap();
        assert_eq!(loaded, descriptor);

        let magnet = loaded.magnet().unwrap();
        let hash = loaded.info_hash().unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(
            magnet,
            format!(
                "magnet:?xt=urn:btmh:{hash}&dn=my%20community&tr=udp%3A%2F%2Ftracker.example%3A1337%2Fannounce"
            )
        );
    }

    #[test]
    fn test_info_hash_ignores_creation_metadata() {
        let dir = tempfile::tempdir().unwrap();
        write_dir(dir.path());
        let config = ArchiveConfig::with_root(dir.path());
        let a = TransferDescriptor::create(&config, "c", dir.path(), &Identity::generate()).unwrap();
        let b = TransferDescriptor::create(&config, "c", dir.path(), &Identity::generate()).unwrap();
        assert_ne!(a.created_by, b.created_by);
        assert_eq!(a.info_hash().unwrap(), b.info_hash().unwrap());
    }

    #[test]
    fn test_signature_binds_creator() {
        let dir = tempfile::tempdir().unwrap();
        write_dir(dir.path());
        let config = ArchiveConfig::with_root(dir.path());
        let mut descriptor =
            TransferDescriptor::create(&config, "c", dir.path(), &Identity::generate()).unwrap();
        assert!(descriptor.verify_signature().is_ok());

        descriptor.created_by = Identity::generate().public_key_hex();
        assert!(descriptor.verify_signature().is_err());

        descriptor.created_by = "zz".into();
        assert!(descriptor.verify_signature().is_err());
    }
}
