//! Configuration Module
//!
//! Environment-driven configuration for the beacon link and the query server.

mod settings;

pub use settings::{BeaconSettings, BridgeConfig, ConfigError, ServerSettings};
