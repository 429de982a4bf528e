//! Domain Layer - Beacon records and reading projections.
//!
//! Pure types with no I/O. Everything here is synchronous and can be
//! exercised without a runtime.

/// Beacon record validation.
pub mod beacon;

/// Published snapshots, staleness and reader projections.
pub mod reading;
