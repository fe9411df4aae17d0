use serde::Serialize;
use tokio::sync::broadcast;

pub const EVENT_CREATING_HISTORY_ARCHIVES: &str = "community.historyArchivesCreating";
pub const EVENT_HISTORY_ARCHIVES_CREATED: &str = "community.historyArchivesCreated";
pub const EVENT_NO_HISTORY_ARCHIVES_CREATED: &str = "community.noHistoryArchivesCreated";
pub const EVENT_HISTORY_ARCHIVES_SEEDING: &str = "community.historyArchivesSeeding";
pub const EVENT_HISTORY_ARCHIVES_UNSEEDED: &str = "community.historyArchivesUnseeded";
pub const EVENT_IMPORTING_HISTORY_ARCHIVE_MESSAGES: &str =
    "community.importingHistoryArchiveMessages";
pub const EVENT_HISTORY_ARCHIVES_IMPORTED: &str = "community.historyArchivesImported";
pub const EVENT_NO_HISTORY_ARCHIVES_IMPORTED: &str = "community.noHistoryArchivesImported";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommunityPayload {
    pub community_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangePayload {
    pub community_id: String,
    pub from: u64,
    pub to: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedPayload {
    pub community_id: String,
    pub count: usize,
}

/// Lifecycle events of the archive subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ArchiveSignal {
    CreatingHistoryArchives(CommunityPayload),
    HistoryArchivesCreated(RangePayload),
    NoHistoryArchivesCreated(RangePayload),
    HistoryArchivesSeeding(CommunityPayload),
    HistoryArchivesUnseeded(CommunityPayload),
    ImportingHistoryArchiveMessages(CommunityPayload),
    HistoryArchivesImported(ImportedPayload),
    NoHistoryArchivesImported(CommunityPayload),
}

impl ArchiveSignal {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::CreatingHistoryArchives(_) => EVENT_CREATING_HISTORY_ARCHIVES,
            Self::HistoryArchivesCreated(_) => EVENT_HISTORY_ARCHIVES_CREATED,
            Self::NoHistoryArchivesCreated(_) => EVENT_NO_HISTORY_ARCHIVES_CREATED,
            Self::HistoryArchivesSeeding(_) => EVENT_HISTORY_ARCHIVES_SEEDING,
            Self::HistoryArchivesUnseeded(_) => EVENT_HISTORY_ARCHIVES_UNSEEDED,
            Self::ImportingHistoryArchiveMessages(_) => EVENT_IMPORTING_HISTORY_ARCHIVE_MESSAGES,
            Self::HistoryArchivesImported(_) => EVENT_HISTORY_ARCHIVES_IMPORTED,
            Self::NoHistoryArchivesImported(_) => EVENT_NO_HISTORY_ARCHIVES_IMPORTED,
        }
    }

    /// `{"type": <event name>, "event": <payload>}` for external subscribers.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "type": self.event_name(),
            "event": self,
        })
    }
}

/// Fire-and-forget fan-out of [`ArchiveSignal`]s.
///
/// Publishing never blocks: slow subscribers lag and lose the oldest events.
#[derive(Debug, Clone)]
pub struct SignalBridge {
    tx: broadcast::Sender<ArchiveSignal>,
}

impl SignalBridge {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArchiveSignal> {
        self.tx.subscribe()
    }

    pub fn publish(&self, signal: ArchiveSignal) {
        let event = signal.event_name();
        if self.tx.send(signal).is_err() {
            tracing::trace!(event, "No subscribers for archive signal");
        }
    }
}

impl Default for SignalBridge {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bridge = SignalBridge::default();
        let mut rx = bridge.subscribe();

        bridge.publish(ArchiveSignal::HistoryArchivesCreated(RangePayload {
            community_id: "abc".into(),
            from: 1,
            to: 2,
        }));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_name(), EVENT_HISTORY_ARCHIVES_CREATED);
    }

    #[test]
    fn test_publish_without_subscribers_does_not_fail() {
        let bridge = SignalBridge::new(1);
        for _ in 0..10 {
            bridge.publish(ArchiveSignal::CreatingHistoryArchives(CommunityPayload {
                community_id: "abc".into(),
            }));
        }
    }

    #[test]
    fn test_json_shape() {
        let json = ArchiveSignal::NoHistoryArchivesCreated(RangePayload {
            community_id: "abc".into(),
            from: 10,
            to: 20,
        })
        .to_json();
        assert_eq!(json["type"], EVENT_NO_HISTORY_ARCHIVES_CREATED);
        assert_eq!(json["event"]["from"], 10);
        assert_eq!(json["event"]["community_id"], "abc");
    }
}
