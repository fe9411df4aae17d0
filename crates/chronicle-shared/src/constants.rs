/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Ed25519 public key size in bytes (also the community ID length)
pub const PUBKEY_SIZE: usize = 32;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Content topic size in bytes
pub const TOPIC_SIZE: usize = 4;

/// Swarm piece length in bytes (100 KiB). Archive padding aligns to it.
pub const PIECE_LENGTH: u64 = 100 * 1024;

/// Upper bound on payload+signature bytes per archive chunk (30 MB)
pub const MAX_ARCHIVE_SIZE_IN_BYTES: usize = 30_000_000;

/// Default swarm listen port
pub const DEFAULT_SWARM_PORT: u16 = 9025;

/// Default tracker list embedded in transfer descriptors
pub const DEFAULT_ANNOUNCE_LIST: &[&str] = &[
    "udp://tracker.opentrackr.org:1337/announce",
    "udp://tracker.openbittorrent.com:6969/announce",
    "udp://open.stealth.si:80/announce",
];

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_COMMUNITY_KEY: &str = "chronicle-community-key-v1";
pub const KDF_CONTEXT_RATCHET_STEP: &str = "chronicle-hash-ratchet-step-v1";
pub const KDF_CONTEXT_ARCHIVE_ID: &str = "chronicle-archive-id-v1";
