// Community history archives: build, store, seed and import.

pub mod builder;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod file_store;
pub mod import;
pub mod persistence;
pub mod publisher;
pub mod scheduler;
pub mod signals;

pub use builder::{ArchiveBuilder, BuildRequest, MessageSource};
pub use config::ArchiveConfig;
pub use descriptor::TransferDescriptor;
pub use engine::{spawn_engine, EngineCommand, EngineConfig, EngineHandle};
pub use error::{ArchiveError, EngineError, Result};
pub use file_store::{ArchiveFileStore, CommunityLocks};
pub use import::ArchiveImporter;
pub use persistence::ArchivePersistence;
pub use publisher::SwarmPublisher;
pub use scheduler::{ArchiveScheduler, ScheduledCommunity, TaskRegistry};
pub use signals::{ArchiveSignal, SignalBridge};
