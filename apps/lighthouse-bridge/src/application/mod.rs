//! Application Layer - Port definitions and the shared reading state.
//!
//! The collector writes through a `ReadingPublisher`; the query layer reads
//! through the `ReadingSource` port.

/// Port interfaces consumed by the query layer.
pub mod ports;

/// Shared reading state (single writer, many readers).
pub mod services;
