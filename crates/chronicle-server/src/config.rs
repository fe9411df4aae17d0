//! Daemon configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the daemon can start with zero
//! configuration for local development.

use std::path::PathBuf;
use std::time::Duration;

use chronicle_archive::ArchiveConfig;
use chronicle_shared::{CommunityId, SharedError};

/// Default archive period: one week.
const DEFAULT_INTERVAL_SECS: u64 = 7 * 24 * 3_600;

/// A community the daemon archives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunitySetting {
    pub id: CommunityId,
    pub encrypt: bool,
}

#[derive(Clone)]
pub struct DaemonConfig {
    /// Archive paths, piece layout, trackers and swarm port.
    pub archive: ArchiveConfig,

    /// SQLite database holding messages and archive bookkeeping.
    /// Env: `CHRONICLE_DB`
    /// Default: `./chronicle.db`
    pub database_path: PathBuf,

    /// Period between archive runs, also the archive window length.
    /// Env: `ARCHIVE_INTERVAL_SECS`
    /// Default: 7 days
    pub interval: Duration,

    /// Communities to archive.
    /// Env: `ARCHIVE_COMMUNITIES` (comma-separated hex IDs, each optionally
    /// suffixed with `:encrypt`)
    pub communities: Vec<CommunitySetting>,

    /// Unix seconds to start archiving from when a community has no cursor.
    /// Env: `ARCHIVE_SINCE`
    /// Default: one interval before startup.
    pub since: Option<u64>,

    /// Shared secret of encrypted communities (hex).
    /// Env: `ARCHIVE_COMMUNITY_SECRET`
    pub community_secret: Option<Vec<u8>>,

    /// Node identity secret key (hex, 64 chars). Signs transfer descriptors.
    /// Env: `CHRONICLE_IDENTITY_KEY`
    /// Default: none (an ephemeral identity is generated).
    pub identity_key: Option<String>,

    /// Whether the host starts online, enabling seeding immediately.
    /// Env: `CHRONICLE_ONLINE` (true/false)
    /// Default: `true`
    pub online: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            archive: ArchiveConfig::default(),
            database_path: PathBuf::from("./chronicle.db"),
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            communities: Vec::new(),
            since: None,
            community_secret: None,
            identity_key: None,
            online: true,
        }
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for DaemonConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonConfig")
            .field("archive", &self.archive)
            .field("database_path", &self.database_path)
            .field("interval", &self.interval)
            .field("communities", &self.communities)
            .field("since", &self.since)
            .field("community_secret", &self.community_secret.as_ref().map(|_| "<set>"))
            .field("identity_key", &self.identity_key.as_ref().map(|_| "<set>"))
            .field("online", &self.online)
            .finish()
    }
}

impl DaemonConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self {
            archive: ArchiveConfig::from_env(),
            ..Self::default()
        };

        if let Ok(path) = std::env::var("CHRONICLE_DB") {
            config.database_path = PathBuf::from(path);
        }

        if let Ok(val) = std::env::var("ARCHIVE_INTERVAL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.interval = Duration::from_secs(secs),
                _ => {
                    tracing::warn!(value = %val, "Invalid ARCHIVE_INTERVAL_SECS, using default");
                }
            }
        }

        if let Ok(list) = std::env::var("ARCHIVE_COMMUNITIES") {
            match parse_communities(&list) {
                Ok(communities) => config.communities = communities,
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid ARCHIVE_COMMUNITIES, archiving nothing");
                }
            }
        }

        if let Ok(val) = std::env::var("ARCHIVE_SINCE") {
            match val.parse::<u64>() {
                Ok(ts) => config.since = Some(ts),
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid ARCHIVE_SINCE, using default");
                }
            }
        }

        if let Ok(secret) = std::env::var("ARCHIVE_COMMUNITY_SECRET") {
            match hex::decode(secret.trim()) {
                Ok(bytes) if !bytes.is_empty() => config.community_secret = Some(bytes),
                _ => {
                    tracing::warn!("Invalid ARCHIVE_COMMUNITY_SECRET, encryption unavailable");
                }
            }
        }

        if let Ok(key) = std::env::var("CHRONICLE_IDENTITY_KEY") {
            if !key.is_empty() {
                config.identity_key = Some(key);
            }
        }

        if let Ok(val) = std::env::var("CHRONICLE_ONLINE") {
            config.online = val != "false" && val != "0";
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

/// Parse `hex[:encrypt],hex[:encrypt],...`. Duplicate IDs keep the first.
fn parse_communities(list: &str) -> Result<Vec<CommunitySetting>, SharedError> {
    let mut communities: Vec<CommunitySetting> = Vec::new();
    for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (id, encrypt) = match item.split_once(':') {
            Some((id, "encrypt")) => (id, true),
            Some((_, flag)) => {
                return Err(SharedError::InvalidCommunityId(format!("unknown flag '{flag}'")));
            }
            None => (item, false),
        };
        let id = CommunityId::from_hex(id)?;
        if communities.iter().all(|c| c.id != id) {
            communities.push(CommunitySetting { id, encrypt });
        }
    }
    Ok(communities)
}
