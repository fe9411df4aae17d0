//! Community encryption for archives and archive indexes.
//!
//! Each community has a hash ratchet: generation 0 is derived from the
//! community secret, and every later generation is one BLAKE3 step further.
//! Envelopes carry the generation they were sealed with, so a reader that
//! holds the base key can open anything up to the current generation.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::crypto::{self, SymmetricKey};
use crate::error::CryptoError;
use crate::protocol::EncryptedEnvelope;
use crate::types::CommunityId;

/// Encrypt/decrypt contract used by the archive subsystem.
pub trait Encryptor: Send + Sync {
    fn encrypt(
        &self,
        community: &CommunityId,
        plaintext: &[u8],
    ) -> Result<EncryptedEnvelope, CryptoError>;

    fn decrypt(
        &self,
        community: &CommunityId,
        envelope: &EncryptedEnvelope,
    ) -> Result<Vec<u8>, CryptoError>;
}

struct Ratchet {
    base: SymmetricKey,
    generation: u64,
    current: SymmetricKey,
}

impl Ratchet {
    fn key_for(&self, generation: u64) -> SymmetricKey {
        let mut key = self.base;
        for _ in 0..generation {
            key = crypto::ratchet_step(&key);
        }
        key
    }
}

/// In-process hash-ratchet keyring.
pub struct HashRatchetEncryptor {
    sender: [u8; 32],
    ratchets: RwLock<HashMap<CommunityId, Ratchet>>,
}

impl HashRatchetEncryptor {
    /// `sender` is the local identity public key, recorded in envelopes.
    pub fn new(sender: [u8; 32]) -> Self {
        Self {
            sender,
            ratchets: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) the shared secret of a community.
    pub fn add_community(&self, community: CommunityId, secret: &[u8]) {
        let base = crypto::derive_community_key(secret, community.as_bytes());
        let mut ratchets = match self.ratchets.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        ratchets.insert(
            community,
            Ratchet {
                base,
                generation: 0,
                current: base,
            },
        );
    }

    /// Advance the community's ratchet; returns the new generation.
    pub fn ratchet(&self, community: &CommunityId) -> Result<u64, CryptoError> {
        let mut ratchets = match self.ratchets.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let ratchet = ratchets
            .get_mut(community)
            .ok_or_else(|| CryptoError::KeyUnavailable(community.to_hex()))?;
        ratchet.current = crypto::ratchet_step(&ratchet.current);
        ratchet.generation += 1;
        Ok(ratchet.generation)
    }
}

impl Encryptor for HashRatchetEncryptor {
    fn encrypt(
        &self,
        community: &CommunityId,
        plaintext: &[u8],
    ) -> Result<EncryptedEnvelope, CryptoError> {
        let ratchets = self
            .ratchets
            .read()
            .map_err(|_| CryptoError::KeyUnavailable(community.to_hex()))?;
        let ratchet = ratchets
            .get(community)
            .ok_or_else(|| CryptoError::KeyUnavailable(community.to_hex()))?;

        Ok(EncryptedEnvelope {
            community_id: community.0.to_vec(),
            generation: ratchet.generation,
            ciphertext: crypto::seal(&ratchet.current, plaintext)?,
            sender: self.sender.to_vec(),
        })
    }

    fn decrypt(
        &self,
        community: &CommunityId,
        envelope: &EncryptedEnvelope,
    ) -> Result<Vec<u8>, CryptoError> {
        if envelope.community_id.as_slice() != community.as_bytes() {
            return Err(CryptoError::DecryptionFailed);
        }

        let ratchets = self
            .ratchets
            .read()
            .map_err(|_| CryptoError::KeyUnavailable(community.to_hex()))?;
        let ratchet = ratchets
            .get(community)
            .ok_or_else(|| CryptoError::KeyUnavailable(community.to_hex()))?;

        if envelope.generation > ratchet.generation {
            return Err(CryptoError::UnknownGeneration {
                community: community.to_hex(),
                generation: envelope.generation,
            });
        }

        let key = if envelope.generation == ratchet.generation {
            ratchet.current
        } else {
            ratchet.key_for(envelope.generation)
        };
        crypto::open(&key, &envelope.ciphertext)
    }
}
