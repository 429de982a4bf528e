//! Latest Reading State
//!
//! Single-writer / multi-reader holder for the most recent beacon record.
//!
//! The record and its publication time live together in one immutable
//! [`Snapshot`] behind an `Arc`; publishing swaps the `Arc` under a short
//! write lock, so a reader sees either the previous pair or the new one.
//! Link state and counters are advisory and updated independently through
//! atomics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::application::ports::ReadingSource;
use crate::domain::beacon::BeaconRecord;
use crate::domain::reading::{
    CollectorStatus, EnrichedRecord, FreshnessWindow, LinkState, Snapshot,
};

#[derive(Debug)]
struct Shared {
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    link_state: AtomicU8,
    records_accepted: AtomicU64,
    segments_rejected: AtomicU64,
    connection_attempts: AtomicU64,
    freshness: FreshnessWindow,
}

/// Create an empty reading state.
///
/// The publisher is the only way to mutate the state and is not `Clone`;
/// handles are cheap to clone and hand out to readers.
#[must_use]
pub fn channel(freshness: FreshnessWindow) -> (ReadingPublisher, ReadingHandle) {
    let shared = Arc::new(Shared {
        snapshot: RwLock::new(None),
        link_state: AtomicU8::new(LinkState::Disconnected.as_u8()),
        records_accepted: AtomicU64::new(0),
        segments_rejected: AtomicU64::new(0),
        connection_attempts: AtomicU64::new(0),
        freshness,
    });

    (
        ReadingPublisher {
            shared: Arc::clone(&shared),
        },
        ReadingHandle { shared },
    )
}

// =============================================================================
// Writer
// =============================================================================

/// Write side of the reading state. Owned by the stream collector.
#[derive(Debug)]
pub struct ReadingPublisher {
    shared: Arc<Shared>,
}

impl ReadingPublisher {
    /// Publish a record stamped with the current time.
    pub fn publish(&self, record: BeaconRecord) {
        self.publish_at(record, Utc::now());
    }

    /// Publish a record stamped with `at`.
    pub fn publish_at(&self, record: BeaconRecord, at: DateTime<Utc>) {
        let snapshot = Arc::new(Snapshot::new(record, at));
        *self.shared.snapshot.write() = Some(snapshot);
        self.shared.records_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Update the link state.
    pub fn set_link_state(&self, state: LinkState) {
        self.shared
            .link_state
            .store(state.as_u8(), Ordering::Release);
    }

    /// Count a discarded segment.
    pub fn record_rejected(&self) {
        self.shared.segments_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a connection attempt.
    pub fn record_connection_attempt(&self) {
        self.shared
            .connection_attempts
            .fetch_add(1, Ordering::Relaxed);
    }

    /// A read handle onto the same state.
    #[must_use]
    pub fn handle(&self) -> ReadingHandle {
        ReadingHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

// =============================================================================
// Readers
// =============================================================================

/// Read side of the reading state.
#[derive(Debug, Clone)]
pub struct ReadingHandle {
    shared: Arc<Shared>,
}

impl ReadingHandle {
    /// The latest fresh record at `now`, merged with derived fields.
    #[must_use]
    pub fn read_current_at(&self, now: DateTime<Utc>) -> Option<EnrichedRecord> {
        let snapshot = self.snapshot()?;
        snapshot.enrich(now, self.is_connected(), self.shared.freshness)
    }

    /// The raw latest snapshot, fresh or not.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.shared.snapshot.read().clone()
    }

    /// Current link state.
    #[must_use]
    pub fn link_state(&self) -> LinkState {
        LinkState::from_u8(self.shared.link_state.load(Ordering::Acquire))
    }

    /// Whether a live socket to the beacon is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.link_state().is_connected()
    }
}

impl ReadingSource for ReadingHandle {
    fn read_current(&self) -> Option<EnrichedRecord> {
        self.read_current_at(Utc::now())
    }

    fn status(&self) -> CollectorStatus {
        let link_state = self.link_state();
        let last_update_time = self.snapshot().map(|s| s.updated_at());

        CollectorStatus {
            connected: link_state.is_connected(),
            link_state,
            last_update_time,
            has_data: last_update_time.is_some(),
            records_accepted: self.shared.records_accepted.load(Ordering::Relaxed),
            segments_rejected: self.shared.segments_rejected.load(Ordering::Relaxed),
            connection_attempts: self.shared.connection_attempts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;
    use serde_json::json;

    use super::*;
    use crate::domain::reading::ConnectionStatus;

    fn beacon(seq: u64) -> BeaconRecord {
        BeaconRecord::try_from(json!({"lighthouse_id": "A", "beacon_sequence_number": seq}))
            .unwrap()
    }

    #[test]
    fn empty_state_has_no_data() {
        let (_publisher, handle) = channel(FreshnessWindow::default());

        assert!(handle.read_current().is_none());

        let status = handle.status();
        assert!(!status.connected);
        assert!(!status.has_data);
        assert_eq!(status.last_update_time, None);
        assert_eq!(status.link_state, LinkState::Disconnected);
    }

    #[test]
    fn publish_makes_record_readable() {
        let (publisher, handle) = channel(FreshnessWindow::default());
        publisher.set_link_state(LinkState::Streaming);
        publisher.publish(beacon(1));

        let current = handle.read_current().unwrap();
        assert_eq!(current.record.sequence_number(), Some(1));
        assert_eq!(current.connection_status, ConnectionStatus::Connected);

        let status = handle.status();
        assert!(status.connected);
        assert!(status.has_data);
        assert_eq!(status.records_accepted, 1);
    }

    #[test]
    fn latest_publish_wins() {
        let (publisher, handle) = channel(FreshnessWindow::default());
        publisher.publish(beacon(1));
        publisher.publish(beacon(2));

        let current = handle.read_current().unwrap();
        assert_eq!(current.record.sequence_number(), Some(2));
        assert_eq!(handle.status().records_accepted, 2);
    }

    #[test]
    fn stale_record_is_hidden_but_kept() {
        let (publisher, handle) = channel(FreshnessWindow::new(Duration::from_secs(60)));
        let t = Utc::now();
        publisher.publish_at(beacon(5), t);

        assert!(handle.read_current_at(t + TimeDelta::seconds(59)).is_some());
        assert!(handle.read_current_at(t + TimeDelta::seconds(61)).is_none());

        // Still held, and still reported as present by status.
        assert_eq!(
            handle.snapshot().unwrap().record().sequence_number(),
            Some(5)
        );
        assert!(handle.status().has_data);
    }

    #[test]
    fn disconnect_does_not_erase_data() {
        let (publisher, handle) = channel(FreshnessWindow::default());
        publisher.set_link_state(LinkState::Streaming);
        publisher.publish(beacon(9));
        publisher.set_link_state(LinkState::Disconnected);

        let current = handle.read_current().unwrap();
        assert_eq!(current.record.sequence_number(), Some(9));
        assert_eq!(current.connection_status, ConnectionStatus::Disconnected);

        publisher.set_link_state(LinkState::Stopped);
        assert!(handle.read_current().is_some());
    }

    #[test]
    fn counters_track_rejections_and_attempts() {
        let (publisher, handle) = channel(FreshnessWindow::default());
        publisher.record_rejected();
        publisher.record_rejected();
        publisher.record_connection_attempt();

        let status = handle.status();
        assert_eq!(status.segments_rejected, 2);
        assert_eq!(status.connection_attempts, 1);
        assert_eq!(publisher.handle().status(), status);
    }

    #[test]
    fn concurrent_readers_never_see_torn_pairs() {
        let (publisher, handle) = channel(FreshnessWindow::new(Duration::from_secs(86_400)));
        let base = Utc::now();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let reader = handle.clone();
                scope.spawn(move || {
                    for _ in 0..5_000 {
                        if let Some(snapshot) = reader.snapshot() {
                            let seq = snapshot.record().sequence_number().unwrap();
                            let offset = snapshot.updated_at() - base;
                            assert_eq!(offset.num_milliseconds(), i64::try_from(seq).unwrap());
                        }
                    }
                });
            }

            scope.spawn(|| {
                for seq in 0..5_000_u64 {
                    let at = base + TimeDelta::milliseconds(i64::try_from(seq).unwrap());
                    publisher.publish_at(beacon(seq), at);
                }
            });
        });

        assert_eq!(handle.status().records_accepted, 5_000);
    }
}
