//! Latest Reading Types
//!
//! The snapshot published by the collector and the projections handed to
//! readers. Staleness is judged here, at read time, against a
//! [`FreshnessWindow`]; a stale snapshot is never evicted.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::domain::beacon::BeaconRecord;

// =============================================================================
// Link State
// =============================================================================

/// Connection lifecycle state of the beacon link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// No socket open; waiting to (re)connect.
    #[default]
    Disconnected,
    /// TCP connect in progress.
    Connecting,
    /// Socket open and being read.
    Streaming,
    /// Shut down; no further reconnects.
    Stopped,
}

impl LinkState {
    /// Whether a live socket to the beacon is open.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Streaming)
    }

    /// Compact encoding for atomic storage.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Streaming => 2,
            Self::Stopped => 3,
        }
    }

    /// Inverse of [`LinkState::as_u8`]; unknown values map to `Disconnected`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Streaming,
            3 => Self::Stopped,
            _ => Self::Disconnected,
        }
    }
}

/// Connection status reported alongside a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// The beacon socket is live.
    Connected,
    /// The beacon socket is down (the record may still be fresh).
    Disconnected,
}

impl From<bool> for ConnectionStatus {
    fn from(connected: bool) -> Self {
        if connected {
            Self::Connected
        } else {
            Self::Disconnected
        }
    }
}

// =============================================================================
// Freshness
// =============================================================================

/// Maximum age at which a record is still reported.
///
/// The boundary is inclusive: a record exactly `window` old is fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessWindow(Duration);

impl Default for FreshnessWindow {
    fn default() -> Self {
        Self(Duration::from_secs(60))
    }
}

impl FreshnessWindow {
    /// Create a window of the given length.
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self(window)
    }

    /// Window length.
    #[must_use]
    pub const fn duration(self) -> Duration {
        self.0
    }

    /// Whether a record of the given age may be reported.
    #[must_use]
    pub fn is_fresh(self, age: Duration) -> bool {
        age <= self.0
    }
}

/// Age of something updated at `updated_at`, as seen at `now`.
///
/// Clock steps backwards clamp to zero.
#[must_use]
pub fn age_at(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(updated_at)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

// =============================================================================
// Snapshot
// =============================================================================

/// A record together with the instant it was published.
///
/// Published and read as one unit so the pair is never torn.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    record: BeaconRecord,
    updated_at: DateTime<Utc>,
}

impl Snapshot {
    /// Create a snapshot.
    #[must_use]
    pub const fn new(record: BeaconRecord, updated_at: DateTime<Utc>) -> Self {
        Self { record, updated_at }
    }

    /// The published record.
    #[must_use]
    pub const fn record(&self) -> &BeaconRecord {
        &self.record
    }

    /// When the record was published.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Project the snapshot for a reader at `now`.
    ///
    /// Returns `None` when the snapshot is older than `window`.
    #[must_use]
    pub fn enrich(
        &self,
        now: DateTime<Utc>,
        connected: bool,
        window: FreshnessWindow,
    ) -> Option<EnrichedRecord> {
        let age = age_at(self.updated_at, now);
        if !window.is_fresh(age) {
            return None;
        }

        Some(EnrichedRecord {
            record: self.record.clone(),
            connection_status: ConnectionStatus::from(connected),
            last_update_time: self.updated_at,
            age_seconds: age.as_secs(),
        })
    }
}

// =============================================================================
// Reader Projections
// =============================================================================

/// A fresh record merged with derived fields.
///
/// Serializes as the record's own object with `connection_status`,
/// `last_update_time` and `age_seconds` added. Derived fields win over
/// same-named payload keys.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    /// The underlying beacon record.
    pub record: BeaconRecord,
    /// Link status at read time.
    pub connection_status: ConnectionStatus,
    /// When the record was published.
    pub last_update_time: DateTime<Utc>,
    /// Whole seconds since publication, computed per read.
    pub age_seconds: u64,
}

impl EnrichedRecord {
    /// Merge the record and derived fields into one JSON object.
    #[must_use]
    pub fn to_json_map(&self) -> Map<String, Value> {
        let mut map = self.record.fields().clone();
        map.insert(
            "connection_status".to_string(),
            Value::from(match self.connection_status {
                ConnectionStatus::Connected => "connected",
                ConnectionStatus::Disconnected => "disconnected",
            }),
        );
        map.insert(
            "last_update_time".to_string(),
            Value::from(
                self.last_update_time
                    .to_rfc3339_opts(SecondsFormat::AutoSi, true),
            ),
        );
        map.insert("age_seconds".to_string(), Value::from(self.age_seconds));
        map
    }
}

impl Serialize for EnrichedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json_map().serialize(serializer)
    }
}

/// Cheap status projection, available with or without data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectorStatus {
    /// Whether a live socket to the beacon is open.
    pub connected: bool,
    /// Current lifecycle state.
    pub link_state: LinkState,
    /// When the latest record was published, if any.
    pub last_update_time: Option<DateTime<Utc>>,
    /// Whether any record has ever been published.
    pub has_data: bool,
    /// Records accepted since start.
    pub records_accepted: u64,
    /// Segments discarded since start.
    pub segments_rejected: u64,
    /// Connection attempts since start.
    pub connection_attempts: u64,
}
