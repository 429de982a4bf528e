#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )
)]

//! Lighthouse Bridge - Beacon Telemetry over HTTP
//!
//! Keeps a single long-lived TCP connection to a lighthouse beacon, splits
//! its byte stream into JSON records on a fixed separator line, and serves
//! the most recent fresh record to any number of HTTP readers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Records and snapshot semantics
//!   - `beacon`: `BeaconRecord` and its identifying field
//!   - `reading`: `Snapshot`, freshness, enriched reader projection
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: `ReadingSource` used by the query facade
//!   - `services`: single-writer snapshot store (`channel`)
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `beacon`: framing codec, idle monitor, reconnect policy, collector
//!   - `http`: axum query API
//!   - `config`: environment configuration
//!   - `metrics`, `telemetry`: Prometheus and tracing
//!
//! # Data Flow
//!
//! ```text
//! beacon TCP ─► BeaconCodec ─► decode_segment ─► ReadingPublisher
//!                                                      │
//!                                                  Snapshot
//!                                                      │
//!              HTTP readers ◄── QueryServer ◄── ReadingHandle
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Record and snapshot types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::beacon::{BeaconRecord, RecordError};
pub use domain::reading::{
    CollectorStatus, ConnectionStatus, EnrichedRecord, FreshnessWindow, LinkState, Snapshot,
};

// Application
pub use application::ports::ReadingSource;
pub use application::services::{ReadingHandle, ReadingPublisher, channel};

// Infrastructure config
pub use infrastructure::config::{BeaconSettings, BridgeConfig, ConfigError, ServerSettings};

// Beacon client
pub use infrastructure::beacon::{
    BeaconCodec, CollectorConfig, CollectorError, FrameError, SegmentOutcome, StreamCollector,
    decode_segment,
};

// Query server
pub use infrastructure::http::{QueryServer, QueryServerError, QueryServerState, router};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
