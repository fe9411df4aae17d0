//! Makes community archive directories available through the swarm engine.
//!
//! The engine is only started once the host is online. Seeds requested
//! before that are queued and flushed by [`SwarmPublisher::set_online`].

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use chronicle_shared::identity::Identity;
use chronicle_shared::CommunityId;

use crate::config::ArchiveConfig;
use crate::descriptor::TransferDescriptor;
use crate::engine::{spawn_engine, EngineConfig, EngineHandle};
use crate::error::{ArchiveError, Result};
use crate::file_store::ArchiveFileStore;
use crate::signals::{ArchiveSignal, CommunityPayload, SignalBridge};

pub struct SwarmPublisher {
    store: ArchiveFileStore,
    signals: SignalBridge,
    identity: Identity,
    engine_config: EngineConfig,
    online: AtomicBool,
    engine: Mutex<Option<EngineHandle>>,
    pending: Mutex<BTreeSet<CommunityId>>,
    /// Community -> info hash of its active transfer.
    transfers: Mutex<HashMap<CommunityId, String>>,
}

impl SwarmPublisher {
    pub fn new(store: ArchiveFileStore, signals: SignalBridge, identity: Identity) -> Self {
        let engine_config = engine_config(store.config());
        Self {
            store,
            signals,
            identity,
            engine_config,
            online: AtomicBool::new(false),
            engine: Mutex::new(None),
            pending: Mutex::new(BTreeSet::new()),
            transfers: Mutex::new(HashMap::new()),
        }
    }

    /// Start seeding a community's archives, replacing any previous
    /// transfer. Queued instead while offline.
    pub async fn seed(&self, community: &CommunityId) -> Result<()> {
        if !self.is_online() {
            self.pending.lock().await.insert(*community);
            debug!(community = %community, "Host offline, seeding deferred");
            return Ok(());
        }

        let engine = self.ensure_engine().await;
        let descriptor = self.descriptor(community).await?;
        let root = self.store.archive_dir(community);

        let previous = self.transfers.lock().await.remove(community);
        if let Some(old_hash) = previous {
            engine.drop_transfer(&old_hash).await?;
        }

        let info_hash = engine.add_transfer(descriptor, root).await?;
        engine.start_seeding(&info_hash).await?;
        self.transfers.lock().await.insert(*community, info_hash.clone());

        info!(community = %community, info_hash = %info_hash, "Seeding history archives");
        self.signals
            .publish(ArchiveSignal::HistoryArchivesSeeding(CommunityPayload {
                community_id: community.to_hex(),
            }));
        Ok(())
    }

    /// Stop seeding. Does nothing when the community is not seeding.
    pub async fn unseed(&self, community: &CommunityId) -> Result<()> {
        self.pending.lock().await.remove(community);

        let Some(info_hash) = self.transfers.lock().await.remove(community) else {
            return Ok(());
        };

        let engine = self.engine.lock().await.clone();
        if let Some(engine) = engine {
            engine.drop_transfer(&info_hash).await?;
        }

        info!(community = %community, info_hash = %info_hash, "Unseeded history archives");
        self.signals
            .publish(ArchiveSignal::HistoryArchivesUnseeded(CommunityPayload {
                community_id: community.to_hex(),
            }));
        Ok(())
    }

    pub async fn magnet_link(&self, community: &CommunityId) -> Result<String> {
        self.stored_descriptor(community).await?.magnet()
    }

    /// Mark the host online or offline. Going online for the first time
    /// starts the engine and flushes deferred seeds.
    pub async fn set_online(&self, online: bool) {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if !online || was_online {
            return;
        }

        self.ensure_engine().await;

        let pending: Vec<CommunityId> = std::mem::take(&mut *self.pending.lock().await)
            .into_iter()
            .collect();
        for community in pending {
            if let Err(e) = self.seed(&community).await {
                warn!(community = %community, error = %e, "Deferred seeding failed");
            }
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Start the engine without waiting for a seed request.
    pub async fn start(&self) {
        self.ensure_engine().await;
    }

    /// Unseed every community and shut the engine down.
    pub async fn stop(&self) -> Result<()> {
        let communities: Vec<CommunityId> = self.transfers.lock().await.keys().copied().collect();
        for community in communities {
            self.unseed(&community).await?;
        }

        if let Some(engine) = self.engine.lock().await.take() {
            engine.shutdown().await;
        }
        Ok(())
    }

    pub async fn is_seeding(&self, community: &CommunityId) -> bool {
        self.transfers.lock().await.contains_key(community)
    }

    pub async fn seeding_count(&self) -> usize {
        self.transfers.lock().await.len()
    }

    pub async fn engine_started(&self) -> bool {
        self.engine.lock().await.is_some()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn ensure_engine(&self) -> EngineHandle {
        let mut engine = self.engine.lock().await;
        match engine.as_ref() {
            Some(handle) if !handle.is_closed() => handle.clone(),
            _ => {
                let handle = spawn_engine(self.engine_config.clone());
                *engine = Some(handle.clone());
                handle
            }
        }
    }

    /// Descriptor under the community lock, rebuilt if missing.
    async fn descriptor(&self, community: &CommunityId) -> Result<TransferDescriptor> {
        let store = self.store.clone();
        let community = *community;
        let identity = self.identity.clone();
        tokio::task::spawn_blocking(move || store.load_or_create_descriptor(&community, &identity))
            .await
            .map_err(|e| ArchiveError::Task(e.to_string()))?
    }

    async fn stored_descriptor(&self, community: &CommunityId) -> Result<TransferDescriptor> {
        let store = self.store.clone();
        let community = *community;
        tokio::task::spawn_blocking(move || store.load_descriptor(&community))
            .await
            .map_err(|e| ArchiveError::Task(e.to_string()))?
    }
}

fn engine_config(config: &ArchiveConfig) -> EngineConfig {
    EngineConfig {
        listen_port: config.listen_port,
    }
}
