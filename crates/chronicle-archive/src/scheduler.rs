//! Periodic archive creation, one tokio task per community.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use chronicle_shared::{CommunityId, TopicType};

use crate::builder::ArchiveBuilder;
use crate::error::{ArchiveError, Result};
use crate::publisher::SwarmPublisher;

/// What the scheduler needs to know about a community.
#[derive(Debug, Clone)]
pub struct ScheduledCommunity {
    pub id: CommunityId,
    pub topics: Vec<TopicType>,
    /// Unix seconds; the first archive window starts here.
    pub created_at: u64,
    pub encrypt: bool,
}

pub struct TaskHandle {
    stop: watch::Sender<bool>,
    /// Taken by the stop call that drains the task.
    join: Option<JoinHandle<()>>,
}

pub type TaskRegistry = Arc<Mutex<HashMap<CommunityId, TaskHandle>>>;

pub struct ArchiveScheduler {
    registry: TaskRegistry,
    builder: Arc<ArchiveBuilder>,
    publisher: Arc<SwarmPublisher>,
}

impl ArchiveScheduler {
    pub fn new(registry: TaskRegistry, builder: Arc<ArchiveBuilder>, publisher: Arc<SwarmPublisher>) -> Self {
        Self {
            registry,
            builder,
            publisher,
        }
    }

    /// Start the archive task of a community. Returns `false` when one is
    /// already running or still stopping.
    pub async fn start_interval(&self, community: ScheduledCommunity, period: Duration) -> bool {
        let mut registry = self.registry.lock().await;
        if registry.contains_key(&community.id) {
            debug!(community = %community.id, "Archive task already registered");
            return false;
        }

        let id = community.id;
        let (stop_tx, stop_rx) = watch::channel(false);
        let join = tokio::spawn(run_interval(
            community,
            period,
            self.builder.clone(),
            self.publisher.clone(),
            stop_rx,
        ));
        registry.insert(
            id,
            TaskHandle {
                stop: stop_tx,
                join: Some(join),
            },
        );

        info!(community = %id, period_secs = period.as_secs(), "Archive task started");
        true
    }

    /// Stop the task of a community, wait for any in-flight build, unseed,
    /// then forget the task. The entry stays registered until then, so a
    /// concurrent `start_interval` is refused instead of racing the unseed.
    /// Returns `false` when no task was registered or another stop is
    /// already draining it.
    pub async fn stop_interval(&self, community: &CommunityId) -> Result<bool> {
        let join = {
            let mut registry = self.registry.lock().await;
            let Some(handle) = registry.get_mut(community) else {
                return Ok(false);
            };
            let Some(join) = handle.join.take() else {
                debug!(community = %community, "Archive task already stopping");
                return Ok(false);
            };
            // receiver may already be gone if the task panicked
            let _ = handle.stop.send(true);
            join
        };

        if let Err(e) = join.await {
            warn!(community = %community, error = %e, "Archive task ended abnormally");
        }

        let unseeded = self.publisher.unseed(community).await;
        self.registry.lock().await.remove(community);
        unseeded?;

        info!(community = %community, "Archive task stopped");
        Ok(true)
    }

    /// Stop every task concurrently. Reports the first failure after all
    /// stops have completed.
    pub async fn stop_all(&self) -> Result<()> {
        let communities: Vec<CommunityId> = self.registry.lock().await.keys().copied().collect();
        let results = futures::future::join_all(communities.iter().map(|c| self.stop_interval(c))).await;
        results.into_iter().try_for_each(|r| r.map(|_| ()))
    }

    pub async fn task_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    pub async fn is_running(&self, community: &CommunityId) -> bool {
        self.registry.lock().await.contains_key(community)
    }
}

async fn run_interval(
    community: ScheduledCommunity,
    period: Duration,
    builder: Arc<ArchiveBuilder>,
    publisher: Arc<SwarmPublisher>,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }
        if *stop.borrow() {
            break;
        }

        // not raced against stop: a build always runs to completion
        match run_tick(&community, period, builder.clone()).await {
            Ok(created) => {
                if let Err(e) = seed_archives(&community.id, !created.is_empty(), &builder, &publisher).await {
                    error!(community = %community.id, error = %e, "Seeding after archive run failed");
                }
            }
            Err(e) => {
                error!(community = %community.id, error = %e, "Archive run failed");
            }
        }
    }

    debug!(community = %community.id, "Archive task exiting");
}

/// Seed after a successful tick. New archives always reseed; otherwise
/// archives already on disk are seeded when nothing is seeding them yet,
/// which covers a restart where no new messages arrive.
async fn seed_archives(
    community: &CommunityId,
    created: bool,
    builder: &ArchiveBuilder,
    publisher: &SwarmPublisher,
) -> Result<()> {
    if !created {
        if publisher.is_seeding(community).await {
            return Ok(());
        }
        let data = builder.store().data_path(community);
        if !tokio::fs::try_exists(&data).await.unwrap_or(false) {
            return Ok(());
        }
    }

    match publisher.seed(community).await {
        Err(ArchiveError::DescriptorNotFound(_)) => {
            debug!(community = %community, "No archives to seed");
            Ok(())
        }
        other => other,
    }
}

/// Seconds of wall-clock drift tolerated when deciding whether a full
/// period has passed since the cursor.
fn period_slack(period_secs: u64) -> u64 {
    (period_secs / 20).max(1)
}

/// One scheduled run: archive everything from the cursor up to now.
async fn run_tick(
    community: &ScheduledCommunity,
    period: Duration,
    builder: Arc<ArchiveBuilder>,
) -> Result<Vec<String>> {
    let community = community.clone();
    let period_secs = period.as_secs().max(1);
    let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();

    tokio::task::spawn_blocking(move || {
        let cursor = builder.persistence().last_archive_end_date(&community.id)?;
        if let Some(last) = cursor {
            let elapsed = now.saturating_sub(last);
            if elapsed + period_slack(period_secs) < period_secs {
                debug!(community = %community.id, last, now, "Less than one period since last run");
                return Ok(Vec::new());
            }
        }

        let start = cursor.unwrap_or(community.created_at);
        if start >= now {
            return Ok(Vec::new());
        }

        builder.create_from_storage(
            community.id,
            community.topics,
            start,
            now,
            period_secs,
            community.encrypt,
        )
    })
    .await
    .map_err(|e| ArchiveError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Condvar;

    use chronicle_shared::identity::Identity;
    use chronicle_shared::Message;
    use chronicle_store::{Database, SharedDatabase, StoreError};

    use crate::config::ArchiveConfig;
    use crate::file_store::ArchiveFileStore;
    use crate::persistence::ArchivePersistence;
    use crate::signals::SignalBridge;

    const DAY: u64 = 24 * 3_600;

    struct Fixture {
        _dir: tempfile::TempDir,
        db: SharedDatabase,
        builder: Arc<ArchiveBuilder>,
        scheduler: Arc<ArchiveScheduler>,
        publisher: Arc<SwarmPublisher>,
        registry: TaskRegistry,
    }

    fn fixture() -> Fixture {
        fixture_with(|db| Arc::new(db) as Arc<dyn ArchivePersistence>)
    }

    fn fixture_with(persistence: impl FnOnce(SharedDatabase) -> Arc<dyn ArchivePersistence>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveFileStore::new(ArchiveConfig::with_root(dir.path()), None);
        let signals = SignalBridge::default();
        let db = Database::open_at(&dir.path().join("chronicle.db"))
            .unwrap()
            .into_shared();
        let identity = Identity::generate();
        let builder = Arc::new(ArchiveBuilder::new(
            store.clone(),
            persistence(db.clone()),
            signals.clone(),
            identity.clone(),
        ));
        let publisher = Arc::new(SwarmPublisher::new(store, signals, identity));
        let registry: TaskRegistry = Arc::new(Mutex::new(HashMap::new()));
        let scheduler = Arc::new(ArchiveScheduler::new(
            registry.clone(),
            builder.clone(),
            publisher.clone(),
        ));
        Fixture {
            _dir: dir,
            db,
            builder,
            scheduler,
            publisher,
            registry,
        }
    }

    /// Blocks message queries until released, so a build can be held open.
    #[derive(Default)]
    struct Gate {
        entered: AtomicBool,
        open: std::sync::Mutex<bool>,
        cond: Condvar,
    }

    impl Gate {
        fn pass(&self) {
            self.entered.store(true, Ordering::SeqCst);
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.cond.wait(open).unwrap();
            }
        }

        fn release(&self) {
            *self.open.lock().unwrap() = true;
            self.cond.notify_all();
        }
    }

    // a failed assertion must not leave the blocking build parked forever
    struct ReleaseOnDrop(Arc<Gate>);

    impl Drop for ReleaseOnDrop {
        fn drop(&mut self) {
            self.0.release();
        }
    }

    struct GatedPersistence {
        db: SharedDatabase,
        gate: Arc<Gate>,
    }

    impl ArchivePersistence for GatedPersistence {
        fn messages_by_topics_and_range(
            &self,
            topics: &[TopicType],
            from: u64,
            to: u64,
        ) -> std::result::Result<Vec<Message>, StoreError> {
            self.gate.pass();
            self.db.messages_by_topics_and_range(topics, from, to)
        }

        fn last_archive_end_date(&self, community: &CommunityId) -> std::result::Result<Option<u64>, StoreError> {
            self.db.last_archive_end_date(community)
        }

        fn set_archive_end_date(&self, community: &CommunityId, end_date: u64) -> std::result::Result<(), StoreError> {
            self.db.set_archive_end_date(community, end_date)
        }

        fn record_archive_ids(
            &self,
            community: &CommunityId,
            archive_ids: &[String],
        ) -> std::result::Result<(), StoreError> {
            self.db.record_archive_ids(community, archive_ids)
        }

        fn imported_archive_ids(&self, community: &CommunityId) -> std::result::Result<HashSet<String>, StoreError> {
            self.db.imported_archive_ids(community)
        }

        fn mark_archive_imported(&self, community: &CommunityId, archive_id: &str) -> std::result::Result<(), StoreError> {
            self.db.mark_archive_imported(community, archive_id)
        }
    }

    fn now() -> u64 {
        chrono::Utc::now().timestamp() as u64
    }

    fn scheduled(id: u8, created_at: u64) -> ScheduledCommunity {
        ScheduledCommunity {
            id: CommunityId([id; 32]),
            topics: vec![TopicType([1, 2, 3, 4])],
            created_at,
            encrypt: false,
        }
    }

    fn insert_message(db: &SharedDatabase, timestamp: u64) {
        db.lock()
            .unwrap()
            .insert_message(&Message {
                signature: vec![1; 65],
                timestamp: timestamp as u32,
                topic: TopicType([1, 2, 3, 4]),
                payload: b"hello".to_vec(),
                padding: vec![],
                hash: vec![1; 32],
                third_party_id: None,
            })
            .unwrap();
    }

    async fn wait_for_cursor(db: &SharedDatabase, id: &CommunityId) -> u64 {
        for _ in 0..500 {
            if let Some(cursor) = db.last_archive_end_date(id).unwrap() {
                return cursor;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("archive task never ran");
    }

    async fn wait_for_seeding(publisher: &SwarmPublisher, id: &CommunityId) -> bool {
        for _ in 0..500 {
            if publisher.is_seeding(id).await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_start_is_single_flight() {
        let f = fixture();
        let period = Duration::from_secs(3_600);

        assert!(f.scheduler.start_interval(scheduled(1, now() - DAY), period).await);
        assert!(!f.scheduler.start_interval(scheduled(1, now() - DAY), period).await);
        assert_eq!(f.scheduler.task_count().await, 1);
        assert_eq!(f.registry.lock().await.len(), 1);

        assert!(f.scheduler.stop_interval(&CommunityId([1; 32])).await.unwrap());
        assert_eq!(f.scheduler.task_count().await, 0);
        assert!(!f.scheduler.stop_interval(&CommunityId([1; 32])).await.unwrap());
    }

    #[tokio::test]
    async fn test_stop_all() {
        let f = fixture();
        let period = Duration::from_secs(3_600);
        for id in 1..=3 {
            f.scheduler.start_interval(scheduled(id, now() - DAY), period).await;
        }
        assert_eq!(f.scheduler.task_count().await, 3);

        f.scheduler.stop_all().await.unwrap();
        assert_eq!(f.scheduler.task_count().await, 0);
        assert!(!f.scheduler.is_running(&CommunityId([2; 32])).await);
    }

    #[tokio::test]
    async fn test_first_tick_archives_and_seeds() {
        let f = fixture();
        f.publisher.set_online(true).await;
        let id = CommunityId([5; 32]);
        let created_at = now() - 3 * DAY;
        insert_message(&f.db, created_at + 60);

        f.scheduler
            .start_interval(scheduled(5, created_at), Duration::from_secs(DAY))
            .await;
        let cursor = wait_for_cursor(&f.db, &id).await;
        assert!(cursor > created_at);
        assert!(wait_for_seeding(&f.publisher, &id).await);

        f.scheduler.stop_interval(&id).await.unwrap();
        assert!(!f.publisher.is_seeding(&id).await);
    }

    #[tokio::test]
    async fn test_restart_seeds_archives_already_on_disk() {
        let f = fixture();
        let id = CommunityId([9; 32]);
        let created_at = now() - 2 * DAY;
        insert_message(&f.db, created_at + 60);
        let last_run = now() - 60;
        let ids = f
            .builder
            .create_from_storage(id, vec![TopicType([1, 2, 3, 4])], created_at, last_run, DAY, false)
            .unwrap();
        assert_eq!(ids.len(), 1);

        // fresh process state over the same files and database
        let publisher = Arc::new(SwarmPublisher::new(
            f.builder.store().clone(),
            SignalBridge::default(),
            Identity::generate(),
        ));
        let scheduler = ArchiveScheduler::new(
            Arc::new(Mutex::new(HashMap::new())),
            f.builder.clone(),
            publisher.clone(),
        );
        publisher.set_online(true).await;

        scheduler
            .start_interval(scheduled(9, created_at), Duration::from_secs(DAY))
            .await;
        assert!(wait_for_seeding(&publisher, &id).await);
        // the tick itself was skipped: less than a period since the last run
        assert_eq!(f.db.last_archive_end_date(&id).unwrap(), Some(last_run));

        scheduler.stop_interval(&id).await.unwrap();
        assert!(!publisher.is_seeding(&id).await);
    }

    #[tokio::test]
    async fn test_tick_without_archives_does_not_seed() {
        let f = fixture();
        let id = CommunityId([4; 32]);

        f.scheduler
            .start_interval(scheduled(4, now() - DAY), Duration::from_secs(3_600))
            .await;
        wait_for_cursor(&f.db, &id).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // offline seeds would be queued; nothing was there to queue
        assert_eq!(f.publisher.pending_count().await, 0);
        assert!(!f.publisher.is_seeding(&id).await);
        f.scheduler.stop_interval(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_tick_skipped_within_one_period() {
        let f = fixture();
        let id = CommunityId([6; 32]);
        let recent = now() - 60;
        f.db.set_archive_end_date(&id, recent).unwrap();

        f.scheduler
            .start_interval(scheduled(6, now() - DAY), Duration::from_secs(3_600))
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        f.scheduler.stop_interval(&id).await.unwrap();

        assert_eq!(f.db.last_archive_end_date(&id).unwrap(), Some(recent));
    }

    #[tokio::test]
    async fn test_tick_runs_when_period_nearly_elapsed() {
        let f = fixture();
        let id = CommunityId([3; 32]);
        // a few seconds of clock drift short of a full period
        let almost = now() - (3_600 - 5);
        f.db.set_archive_end_date(&id, almost).unwrap();

        f.scheduler
            .start_interval(scheduled(3, now() - DAY), Duration::from_secs(3_600))
            .await;
        let mut advanced = false;
        for _ in 0..500 {
            if f.db.last_archive_end_date(&id).unwrap() > Some(almost) {
                advanced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        f.scheduler.stop_interval(&id).await.unwrap();
        assert!(advanced);
    }

    #[test]
    fn test_period_slack() {
        assert_eq!(period_slack(1), 1);
        assert_eq!(period_slack(3_600), 180);
        assert_eq!(period_slack(7 * DAY), 7 * DAY / 20);
    }

    #[tokio::test]
    async fn test_stop_waits_for_running_build() {
        let gate = Arc::new(Gate::default());
        let _release = ReleaseOnDrop(gate.clone());
        let f = fixture_with({
            let gate = gate.clone();
            move |db| Arc::new(GatedPersistence { db, gate }) as Arc<dyn ArchivePersistence>
        });
        let id = CommunityId([7; 32]);
        let period = Duration::from_secs(3_600);

        f.scheduler.start_interval(scheduled(7, now() - 2 * DAY), period).await;
        for _ in 0..500 {
            if gate.entered.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(gate.entered.load(Ordering::SeqCst));

        let stopping = tokio::spawn({
            let scheduler = f.scheduler.clone();
            async move { scheduler.stop_interval(&id).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        // the build is parked: stop has not returned and the task is still
        // registered, so a restart is refused
        assert!(!stopping.is_finished());
        assert!(f.scheduler.is_running(&id).await);
        assert!(!f.scheduler.start_interval(scheduled(7, now() - 2 * DAY), period).await);
        assert!(!f.scheduler.stop_interval(&id).await.unwrap());
        assert_eq!(f.db.last_archive_end_date(&id).unwrap(), None);

        gate.release();
        assert!(stopping.await.unwrap().unwrap());

        assert!(f.db.last_archive_end_date(&id).unwrap().is_some());
        assert!(!f.scheduler.is_running(&id).await);
        assert!(f.registry.lock().await.is_empty());

        // a new task can start once the old one is gone
        assert!(f.scheduler.start_interval(scheduled(7, now() - 2 * DAY), period).await);
        f.scheduler.stop_interval(&id).await.unwrap();
    }
}
