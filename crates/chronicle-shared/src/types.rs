use serde::{Deserialize, Serialize};

use crate::constants::{PUBKEY_SIZE, TOPIC_SIZE};
use crate::error::SharedError;

// Community identity = the community's Ed25519 public key (32 bytes)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommunityId(pub [u8; PUBKEY_SIZE]);

impl CommunityId {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, SharedError> {
        let s = s.trim().trim_start_matches("0x");
        let bytes = hex::decode(s).map_err(|e| SharedError::InvalidCommunityId(e.to_string()))?;
        let arr: [u8; PUBKEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            SharedError::InvalidCommunityId(format!(
                "expected {} bytes, got {}",
                PUBKEY_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for CommunityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// 4-byte content topic a message was published on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicType(pub [u8; TOPIC_SIZE]);

impl TopicType {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SharedError> {
        let arr: [u8; TOPIC_SIZE] = bytes
            .try_into()
            .map_err(|_| SharedError::InvalidTopic(format!("expected 4 bytes, got {}", bytes.len())))?;
        Ok(Self(arr))
    }

    /// Derive a topic from an arbitrary name (first 4 bytes of its BLAKE3 hash).
    pub fn from_name(name: &str) -> Self {
        let hash = blake3::hash(name.as_bytes());
        let mut arr = [0u8; TOPIC_SIZE];
        arr.copy_from_slice(&hash.as_bytes()[..TOPIC_SIZE]);
        Self(arr)
    }

    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl std::fmt::Display for TopicType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// A raw historical message as stored by the node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub signature: Vec<u8>,
    /// Unix seconds
    pub timestamp: u32,
    pub topic: TopicType,
    pub payload: Vec<u8>,
    pub padding: Vec<u8>,
    pub hash: Vec<u8>,
    pub third_party_id: Option<String>,
}

impl Message {
    /// Bytes counted against the archive size bound.
    pub fn archive_size(&self) -> usize {
        self.payload.len() + self.signature.len()
    }
}
