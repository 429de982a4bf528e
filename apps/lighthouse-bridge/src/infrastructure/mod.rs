//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Beacon TCP client: framing, idle detection, reconnection.
pub mod beacon;

/// Configuration loading.
pub mod config;

/// HTTP query API.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry export.
pub mod telemetry;
