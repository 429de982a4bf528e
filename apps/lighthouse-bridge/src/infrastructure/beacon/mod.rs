//! Beacon TCP Adapter
//!
//! Reads the lighthouse beacon's separator-framed JSON feed:
//!
//! - **codec**: byte-stream framing and segment classification
//! - **idle**: read-timeout escalation
//! - **reconnect**: delay schedule between attempts
//! - **collector**: the connection loop that publishes records

pub mod codec;
pub mod collector;
pub mod idle;
pub mod reconnect;

pub use codec::{BeaconCodec, FrameError, SEPARATOR, SegmentOutcome, decode_segment};
pub use collector::{CollectorConfig, CollectorError, SessionEnd, StreamCollector};
pub use idle::{IdleConfig, IdleMonitor, IdleVerdict};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
