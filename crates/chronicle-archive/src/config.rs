//! Archive subsystem configuration loaded from environment variables.
//!
//! All settings have sensible defaults so archives can be produced with zero
//! configuration for local development.

use std::path::PathBuf;

use chronicle_shared::constants::{
    DEFAULT_ANNOUNCE_LIST, DEFAULT_SWARM_PORT, MAX_ARCHIVE_SIZE_IN_BYTES, PIECE_LENGTH,
};

#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Whether archive creation and seeding are enabled at all.
    /// Env: `ARCHIVE_ENABLED` (true/false)
    /// Default: `true`
    pub enabled: bool,

    /// Root under which each community gets `<id>/index` and `<id>/data`.
    /// Env: `ARCHIVE_DATA_DIR`
    /// Default: `./archivedata`
    pub data_dir: PathBuf,

    /// Directory holding `<id>.torrent` transfer descriptors.
    /// Env: `ARCHIVE_TORRENT_DIR`
    /// Default: `./torrents`
    pub torrent_dir: PathBuf,

    /// Swarm piece length; archive padding aligns to it.
    pub piece_length: u64,

    /// Payload+signature bound per archive chunk.
    pub max_archive_size: usize,

    /// Trackers embedded in descriptors and magnet links.
    /// Env: `ARCHIVE_ANNOUNCE` (comma-separated)
    pub announce_list: Vec<String>,

    /// Port the swarm engine listens on.
    /// Env: `ARCHIVE_LISTEN_PORT`
    /// Default: `9025`
    pub listen_port: u16,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            data_dir: PathBuf::from("./archivedata"),
            torrent_dir: PathBuf::from("./torrents"),
            piece_length: PIECE_LENGTH,
            max_archive_size: MAX_ARCHIVE_SIZE_IN_BYTES,
            announce_list: DEFAULT_ANNOUNCE_LIST.iter().map(|s| s.to_string()).collect(),
            listen_port: DEFAULT_SWARM_PORT,
        }
    }
}

impl ArchiveConfig {
    /// Config rooted in a single directory, as used by tests and embedders.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            data_dir: root.join("archivedata"),
            torrent_dir: root.join("torrents"),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ARCHIVE_ENABLED") {
            config.enabled = val != "false" && val != "0";
        }

        if let Ok(path) = std::env::var("ARCHIVE_DATA_DIR") {
            config.data_dir = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("ARCHIVE_TORRENT_DIR") {
            config.torrent_dir = PathBuf::from(path);
        }

        if let Ok(list) = std::env::var("ARCHIVE_ANNOUNCE") {
            let trackers = parse_announce_list(&list);
            if trackers.is_empty() {
                tracing::warn!(value = %list, "Empty ARCHIVE_ANNOUNCE, using default trackers");
            } else {
                config.announce_list = trackers;
            }
        }

        if let Ok(val) = std::env::var("ARCHIVE_LISTEN_PORT") {
            match val.parse::<u16>() {
                Ok(port) => config.listen_port = port,
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid ARCHIVE_LISTEN_PORT, using default");
                }
            }
        }

        config
    }
}

fn parse_announce_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
