use thiserror::Error;

use chronicle_shared::{CryptoError, SharedError};
use chronicle_store::StoreError;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Descriptor serialization error: {0}")]
    Descriptor(#[from] bincode::Error),

    #[error("Encryption error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Archive is encrypted but no encryptor is configured")]
    EncryptionUnavailable,

    #[error("Corrupt archive data for community {community}: {reason}")]
    Corrupt { community: String, reason: String },

    #[error("Archive {archive_id} not found in index of community {community}")]
    ArchiveNotFound { community: String, archive_id: String },

    #[error("No transfer descriptor for community {0}")]
    DescriptorNotFound(String),

    #[error("Invalid build request: {0}")]
    InvalidRequest(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Shared type error: {0}")]
    Shared(#[from] SharedError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Import handler failed for archive {archive_id}: {reason}")]
    Import { archive_id: String, reason: String },

    #[error("Background task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Swarm engine is not running")]
    NotRunning,

    #[error("Piece {index} of {name} does not match the descriptor")]
    PieceMismatch { name: String, index: usize },

    #[error("Transfer data is missing: {0}")]
    MissingData(String),

    #[error("Unknown transfer {0}")]
    UnknownTransfer(String),

    #[error("Piece verification task failed: {0}")]
    Verification(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ArchiveError>;
