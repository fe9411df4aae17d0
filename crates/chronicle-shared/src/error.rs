use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Invalid community id: {0}")]
    InvalidCommunityId(String),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("No key material for community {0}")]
    KeyUnavailable(String),

    #[error("Unknown ratchet generation {generation} for community {community}")]
    UnknownGeneration { community: String, generation: u64 },
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Signature does not verify")]
    InvalidSignature,

    #[error("Key file error: {0}")]
    KeyFile(String),
}
