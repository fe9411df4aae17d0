//! # chronicled
//!
//! Community history-archive daemon.
//!
//! This binary:
//! - periodically bundles each configured community's messages into
//!   piece-aligned, optionally encrypted archives
//! - keeps a per-community index and transfer descriptor next to the data
//! - seeds the archive directories through the swarm engine once online
//! - logs every archive lifecycle signal

mod config;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chronicle_archive::{
    ArchiveBuilder, ArchiveFileStore, ArchiveScheduler, ScheduledCommunity, SignalBridge,
    SwarmPublisher, TaskRegistry,
};
use chronicle_shared::identity::Identity;
use chronicle_shared::{Encryptor, HashRatchetEncryptor, TopicType};
use chronicle_store::Database;

use crate::config::DaemonConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chronicle_archive=debug")),
        )
        .init();

    info!("Starting chronicled v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = DaemonConfig::from_env();
    info!(?config, "Loaded configuration");

    if !config.archive.enabled {
        info!("Archiving disabled (ARCHIVE_ENABLED=false), exiting");
        return Ok(());
    }

    let identity = match &config.identity_key {
        Some(key) => Identity::from_secret_hex(key)?,
        None => {
            warn!("CHRONICLE_IDENTITY_KEY not set, using an ephemeral identity");
            Identity::generate()
        }
    };
    info!(public_key = %identity.public_key_hex(), "Node identity");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?.into_shared();

    let encryptor = HashRatchetEncryptor::new(identity.public_key_bytes());
    for community in config.communities.iter().filter(|c| c.encrypt) {
        match &config.community_secret {
            Some(secret) => encryptor.add_community(community.id, secret),
            None => warn!(
                community = %community.id,
                "Encryption requested but ARCHIVE_COMMUNITY_SECRET is not set; runs will fail"
            ),
        }
    }
    let encryptor: Arc<dyn Encryptor> = Arc::new(encryptor);

    let signals = SignalBridge::default();
    let store = ArchiveFileStore::new(config.archive.clone(), Some(encryptor));
    let builder = Arc::new(ArchiveBuilder::new(
        store.clone(),
        Arc::new(db.clone()),
        signals.clone(),
        identity.clone(),
    ));
    let publisher = Arc::new(SwarmPublisher::new(store, signals.clone(), identity));
    let registry: TaskRegistry = Arc::new(Mutex::new(HashMap::new()));
    let scheduler = ArchiveScheduler::new(registry, builder, publisher.clone());

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Signal logger
    let mut signal_rx = signals.subscribe();
    tokio::spawn(async move {
        loop {
            match signal_rx.recv().await {
                Ok(signal) => {
                    info!(event = signal.event_name(), payload = %signal.to_json(), "Archive signal");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Signal logger lagging");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    publisher.set_online(config.online).await;

    let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
    let since = config
        .since
        .unwrap_or_else(|| now.saturating_sub(config.interval.as_secs()));

    for community in &config.communities {
        scheduler
            .start_interval(
                ScheduledCommunity {
                    id: community.id,
                    topics: vec![TopicType::from_name(&community.id.to_hex())],
                    created_at: since,
                    encrypt: community.encrypt,
                },
                config.interval,
            )
            .await;
    }
    info!(
        communities = scheduler.task_count().await,
        interval_secs = config.interval.as_secs(),
        "Archive tasks running"
    );

    // -----------------------------------------------------------------------
    // 5. Run until shutdown
    // -----------------------------------------------------------------------
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");

    scheduler.stop_all().await?;
    publisher.stop().await?;

    Ok(())
}
