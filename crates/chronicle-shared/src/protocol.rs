//! Protobuf wire schema for archives, the archive index and encrypted
//! envelopes.
//!
//! The encoding must be deterministic: archive IDs are hashes of encoded
//! index entries, and the read path parses the exact bytes the write path
//! produced. Maps use `BTreeMap` for that reason.

use std::collections::BTreeMap;

use prost::Message as _;

use crate::types::{Message, TopicType};

/// A message as it appears inside an archive.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ArchivedMessage {
    #[prost(bytes = "vec", tag = "1")]
    pub sig: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub timestamp: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub topic: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub payload: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub padding: Vec<u8>,
    #[prost(bytes = "vec", tag = "6")]
    pub hash: Vec<u8>,
    #[prost(string, tag = "7")]
    pub third_party_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ArchiveMetadata {
    #[prost(uint64, tag = "1")]
    pub from: u64,
    #[prost(uint64, tag = "2")]
    pub to: u64,
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub content_topic: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Archive {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<ArchiveMetadata>,
    #[prost(message, repeated, tag = "2")]
    pub messages: Vec<ArchivedMessage>,
}

/// Location of one archive inside the community data file.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ArchiveIndexEntry {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<ArchiveMetadata>,
    #[prost(uint64, tag = "2")]
    pub offset: u64,
    #[prost(uint64, tag = "3")]
    pub size: u64,
    #[prost(uint64, tag = "4")]
    pub padding: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ArchiveIndex {
    #[prost(btree_map = "string, message", tag = "1")]
    pub archives: BTreeMap<String, ArchiveIndexEntry>,
}

/// Encrypted wrapper around an encoded archive or index.
///
/// Field tags start at 10 so an envelope never decodes as index or archive
/// content: a plain parse of envelope bytes yields an empty value.
#[derive(Clone, PartialEq, prost::Message)]
pub struct EncryptedEnvelope {
    #[prost(bytes = "vec", tag = "10")]
    pub community_id: Vec<u8>,
    #[prost(uint64, tag = "11")]
    pub generation: u64,
    #[prost(bytes = "vec", tag = "12")]
    pub ciphertext: Vec<u8>,
    #[prost(bytes = "vec", tag = "13")]
    pub sender: Vec<u8>,
}

impl EncryptedEnvelope {
    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }
}

impl ArchiveIndexEntry {
    pub fn from_ts(&self) -> u64 {
        self.metadata.as_ref().map(|m| m.from).unwrap_or_default()
    }

    pub fn to_ts(&self) -> u64 {
        self.metadata.as_ref().map(|m| m.to).unwrap_or_default()
    }

    /// Length of the archive bytes without trailing padding.
    pub fn raw_len(&self) -> u64 {
        self.size.saturating_sub(self.padding)
    }
}

impl ArchiveIndex {
    /// Total bytes the indexed archives occupy in the data file.
    pub fn total_size(&self) -> u64 {
        self.archives.values().map(|e| e.size).sum()
    }

    /// Highest `to` across all entries, i.e. how far history is covered.
    pub fn covered_until(&self) -> Option<u64> {
        self.archives.values().map(ArchiveIndexEntry::to_ts).max()
    }

    pub fn len(&self) -> usize {
        self.archives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archives.is_empty()
    }
}

impl From<&Message> for ArchivedMessage {
    fn from(msg: &Message) -> Self {
        Self {
            sig: msg.signature.clone(),
            timestamp: u64::from(msg.timestamp),
            topic: msg.topic.to_vec(),
            payload: msg.payload.clone(),
            padding: msg.padding.clone(),
            hash: msg.hash.clone(),
            third_party_id: msg.third_party_id.clone().unwrap_or_default(),
        }
    }
}

impl TryFrom<ArchivedMessage> for Message {
    type Error = crate::error::SharedError;

    fn try_from(msg: ArchivedMessage) -> Result<Self, Self::Error> {
        let timestamp = u32::try_from(msg.timestamp).map_err(|_| {
            crate::error::SharedError::Serialization(format!(
                "timestamp out of range: {}",
                msg.timestamp
            ))
        })?;
        Ok(Self {
            signature: msg.sig,
            timestamp,
            topic: TopicType::from_slice(&msg.topic)?,
            payload: msg.payload,
            padding: msg.padding,
            hash: msg.hash,
            third_party_id: if msg.third_party_id.is_empty() {
                None
            } else {
                Some(msg.third_party_id)
            },
        })
    }
}

/// Encode any schema message to a fresh buffer.
pub fn encode<M: prost::Message>(msg: &M) -> Vec<u8> {
    msg.encode_to_vec()
}

/// Decode an envelope; convenience for the two-step parse on the read side.
pub fn decode_envelope(data: &[u8]) -> Result<EncryptedEnvelope, prost::DecodeError> {
    EncryptedEnvelope::decode(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;

    fn message(ts: u32) -> Message {
        Message {
            signature: vec![9; 65],
            timestamp: ts,
            topic: TopicType([1, 2, 3, 4]),
            payload: vec![ts as u8; 8],
            padding: vec![],
            hash: vec![ts as u8; 32],
            third_party_id: None,
        }
    }

    #[test]
    fn test_archived_message_conversion() {
        let msg = message(1_577_840_400);
        let wire = ArchivedMessage::from(&msg);
        assert_eq!(wire.timestamp, 1_577_840_400);
        assert_eq!(Message::try_from(wire).unwrap(), msg);
    }

    #[test]
    fn test_envelope_bytes_decode_as_empty_index() {
        let envelope = EncryptedEnvelope {
            community_id: vec![1; 32],
            generation: 3,
            ciphertext: vec![42; 100],
            sender: vec![],
        };
        let bytes = encode(&envelope);

        let index = ArchiveIndex::decode(bytes.as_slice()).unwrap();
        assert!(index.is_empty());

        let archive = Archive::decode(bytes.as_slice()).unwrap();
        assert!(archive.metadata.is_none());
        assert!(archive.messages.is_empty());

        assert_eq!(decode_envelope(&bytes).unwrap(), envelope);
    }

    #[test]
    fn test_index_encoding_is_deterministic() {
        let mut index = ArchiveIndex::default();
        for i in 0..5u64 {
            index.archives.insert(
                format!("id-{i}"),
                ArchiveIndexEntry {
                    metadata: Some(ArchiveMetadata {
                        from: i * 10,
                        to: i * 10 + 10,
                        content_topic: vec![vec![1, 2, 3, 4]],
                    }),
                    offset: i * 100,
                    size: 100,
                    padding: 7,
                },
            );
        }
        assert_eq!(encode(&index), encode(&index.clone()));
        assert_eq!(index.total_size(), 500);
        assert_eq!(index.covered_until(), Some(50));
    }
}
