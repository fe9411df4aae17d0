use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::constants::{
    KDF_CONTEXT_ARCHIVE_ID, KDF_CONTEXT_COMMUNITY_KEY, KDF_CONTEXT_RATCHET_STEP, NONCE_SIZE,
    SYMMETRIC_KEY_SIZE,
};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; SYMMETRIC_KEY_SIZE];

fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext
pub fn seal(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn open(key: &SymmetricKey, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    XChaCha20Poly1305::new(key.into())
        .decrypt(XNonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Generation-0 key of a community, derived from its shared secret.
pub fn derive_community_key(community_secret: &[u8], community_id: &[u8]) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_COMMUNITY_KEY);
    hasher.update(community_secret);
    hasher.update(community_id);
    *hasher.finalize().as_bytes()
}

/// One step of the hash ratchet: `k(n+1) = KDF(k(n))`.
pub fn ratchet_step(key: &SymmetricKey) -> SymmetricKey {
    blake3::derive_key(KDF_CONTEXT_RATCHET_STEP, key)
}

/// Content hash used to address archive index entries.
pub fn archive_hash(encoded_entry: &[u8]) -> String {
    hex::encode(blake3::derive_key(KDF_CONTEXT_ARCHIVE_ID, encoded_entry))
}
