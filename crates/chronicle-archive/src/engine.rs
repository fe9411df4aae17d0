//! Swarm engine binding with tokio mpsc command/reply pattern.
//!
//! The engine runs in a dedicated tokio task and owns the transfer table.
//! Callers talk to it through a cloneable [`EngineHandle`]; every query
//! carries a oneshot sender for its reply. Pieces are verified against the
//! files on disk before a transfer is accepted. Peer exchange is not part
//! of this binding.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use chronicle_shared::constants::DEFAULT_SWARM_PORT;

use crate::descriptor::TransferDescriptor;
use crate::error::EngineError;

// ---------------------------------------------------------------------------
// Command types
// ---------------------------------------------------------------------------

/// Commands sent *into* the engine task.
#[derive(Debug)]
pub enum EngineCommand {
    /// Register a verified transfer. Replies with its info hash.
    AddTransfer {
        descriptor: TransferDescriptor,
        root: PathBuf,
        reply: oneshot::Sender<Result<String, EngineError>>,
    },
    /// Announce a registered transfer as seeding.
    StartSeeding {
        info_hash: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    /// Forget a transfer. Replies whether it existed.
    DropTransfer {
        info_hash: String,
        reply: oneshot::Sender<bool>,
    },
    /// Stop the engine task.
    Shutdown,
}

/// Configuration for spawning the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Port to listen on (defaults to `DEFAULT_SWARM_PORT`).
    pub listen_port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_SWARM_PORT,
        }
    }
}

struct Transfer {
    descriptor: TransferDescriptor,
    root: PathBuf,
    seeding: bool,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable sender side of the engine task.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub async fn add_transfer(
        &self,
        descriptor: TransferDescriptor,
        root: PathBuf,
    ) -> Result<String, EngineError> {
        let (descriptor, root) = tokio::task::spawn_blocking(move || {
            descriptor
                .verify_signature()
                .map_err(|e| EngineError::Verification(e.to_string()))?;
            descriptor.info.verify(&root)?;
            Ok::<_, EngineError>((descriptor, root))
        })
        .await
        .map_err(|e| EngineError::Verification(e.to_string()))??;

        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::AddTransfer {
            descriptor,
            root,
            reply,
        })
        .await?;
        rx.await.map_err(|_| EngineError::NotRunning)?
    }

    pub async fn start_seeding(&self, info_hash: &str) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::StartSeeding {
            info_hash: info_hash.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| EngineError::NotRunning)?
    }

    pub async fn drop_transfer(&self, info_hash: &str) -> Result<bool, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::DropTransfer {
            info_hash: info_hash.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| EngineError::NotRunning)
    }

    pub async fn shutdown(&self) {
        // already gone is fine
        let _ = self.tx.send(EngineCommand::Shutdown).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, cmd: EngineCommand) -> Result<(), EngineError> {
        self.tx.send(cmd).await.map_err(|_| EngineError::NotRunning)
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Spawn the engine in a background tokio task.
pub fn spawn_engine(config: EngineConfig) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineCommand>(256);

    tokio::spawn(async move {
        info!(port = config.listen_port, "Swarm engine started");
        let mut transfers: HashMap<String, Transfer> = HashMap::new();

        while let Some(cmd) = rx.recv().await {
            match cmd {
                EngineCommand::AddTransfer {
                    descriptor,
                    root,
                    reply,
                } => {
                    let result = descriptor.info_hash().map_err(|e| {
                        EngineError::Verification(format!("info hash: {e}"))
                    });
                    if let Ok(ref info_hash) = result {
                        debug!(
                            info_hash = %info_hash,
                            name = %descriptor.info.name,
                            pieces = descriptor.info.pieces.len(),
                            bytes = descriptor.info.total_length(),
                            "Transfer added"
                        );
                        transfers.insert(
                            info_hash.clone(),
                            Transfer {
                                descriptor,
                                root,
                                seeding: false,
                            },
                        );
                    }
                    let _ = reply.send(result);
                }
                EngineCommand::StartSeeding { info_hash, reply } => {
                    let result = match transfers.get_mut(&info_hash) {
                        Some(transfer) => {
                            transfer.seeding = true;
                            info!(
                                info_hash = %info_hash,
                                root = %transfer.root.display(),
                                "Seeding transfer"
                            );
                            Ok(())
                        }
                        None => Err(EngineError::UnknownTransfer(info_hash)),
                    };
                    let _ = reply.send(result);
                }
                EngineCommand::DropTransfer { info_hash, reply } => {
                    let removed = transfers.remove(&info_hash);
                    if let Some(ref transfer) = removed {
                        debug!(
                            info_hash = %info_hash,
                            name = %transfer.descriptor.info.name,
                            was_seeding = transfer.seeding,
                            "Transfer dropped"
                        );
                    }
                    let _ = reply.send(removed.is_some());
                }
                EngineCommand::Shutdown => {
                    info!(transfers = transfers.len(), "Swarm engine shutting down");
                    break;
                }
            }
        }

        let seeding = transfers.values().filter(|t| t.seeding).count();
        if seeding > 0 {
            warn!(seeding, "Engine stopped while transfers were seeding");
        }
    });

    EngineHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArchiveConfig;
    use chronicle_shared::identity::Identity;

    fn descriptor(dir: &std::path::Path) -> TransferDescriptor {
        std::fs::write(dir.join("data"), vec![3u8; 1000]).unwrap();
        let config = ArchiveConfig::with_root(dir);
        TransferDescriptor::create(&config, "c", dir, &Identity::generate()).unwrap()
    }

    #[tokio::test]
    async fn test_add_seed_drop() {
        let dir = tempfile::tempdir().unwrap();
        let engine = spawn_engine(EngineConfig::default());

        let hash = engine
            .add_transfer(descriptor(dir.path()), dir.path().to_path_buf())
            .await
            .unwrap();
        engine.start_seeding(&hash).await.unwrap();

        assert!(engine.drop_transfer(&hash).await.unwrap());
        assert!(!engine.drop_transfer(&hash).await.unwrap());
        assert!(matches!(
            engine.start_seeding(&hash).await,
            Err(EngineError::UnknownTransfer(_))
        ));
    }

    #[tokio::test]
    async fn test_add_rejects_modified_data() {
        let dir = tempfile::tempdir().unwrap();
        let engine = spawn_engine(EngineConfig::default());
        let descriptor = descriptor(dir.path());
        std::fs::write(dir.path().join("data"), vec![4u8; 1000]).unwrap();

        assert!(matches!(
            engine.add_transfer(descriptor, dir.path().to_path_buf()).await,
            Err(EngineError::PieceMismatch { index: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_seed_unknown_transfer() {
        let engine = spawn_engine(EngineConfig::default());
        assert!(matches!(
            engine.start_seeding("nope").await,
            Err(EngineError::UnknownTransfer(_))
        ));
    }

    #[tokio::test]
    async fn test_commands_after_shutdown() {
        let engine = spawn_engine(EngineConfig::default());
        engine.shutdown().await;

        // the task drains the shutdown command before closing the channel
        for _ in 0..100 {
            if engine.is_closed() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(matches!(
            engine.drop_transfer("gone").await,
            Err(EngineError::NotRunning)
        ));
    }
}
