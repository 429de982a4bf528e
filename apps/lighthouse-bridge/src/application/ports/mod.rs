//! Port Interfaces
//!
//! ## Driver Ports (Inbound)
//!
//! - `ReadingSource`: read-only view of the latest beacon reading, used by
//!   the HTTP query server. Implementations must never block on network I/O.

use crate::domain::reading::{CollectorStatus, EnrichedRecord};

/// Read access to the latest beacon reading.
pub trait ReadingSource: Send + Sync {
    /// The latest record if it is fresh, merged with derived fields.
    fn read_current(&self) -> Option<EnrichedRecord>;

    /// Connectivity and data-presence status.
    fn status(&self) -> CollectorStatus;
}
