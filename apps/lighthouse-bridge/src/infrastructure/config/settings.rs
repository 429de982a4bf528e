//! Bridge Configuration Settings
//!
//! Configuration types for the bridge, loaded from environment variables.

use std::time::Duration;

use crate::domain::reading::FreshnessWindow;
use crate::infrastructure::beacon::codec::DEFAULT_MAX_BUFFER;

/// Beacon connection settings.
#[derive(Debug, Clone)]
pub struct BeaconSettings {
    /// Beacon host name or address.
    pub host: String,
    /// Beacon TCP port.
    pub port: u16,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Upper bound on a single read wait.
    pub read_timeout: Duration,
    /// Consecutive read timeouts before forcing a reconnect.
    pub max_idle_reads: u32,
    /// Bound on bytes buffered without a separator.
    pub max_buffer_bytes: usize,
    /// Delay before reconnecting.
    pub reconnect_delay: Duration,
    /// Maximum reconnect delay when a multiplier is set.
    pub reconnect_delay_max: Duration,
    /// Reconnect delay multiplier (1.0 = fixed delay).
    pub reconnect_multiplier: f64,
    /// Reconnect jitter fraction.
    pub reconnect_jitter: f64,
    /// Maximum reconnect attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for BeaconSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9876,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_millis(2000),
            max_idle_reads: 15,
            max_buffer_bytes: DEFAULT_MAX_BUFFER,
            reconnect_delay: Duration::from_secs(10),
            reconnect_delay_max: Duration::from_secs(10),
            reconnect_multiplier: 1.0,
            reconnect_jitter: 0.0,
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Bind host.
    pub host: String,
    /// HTTP port.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    /// Beacon connection settings.
    pub beacon: BeaconSettings,
    /// HTTP server settings.
    pub server: ServerSettings,
    /// Staleness window for reported records.
    pub freshness: FreshnessWindow,
}

impl BridgeConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// Unset or unparseable values fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error for empty hosts and zero-valued timeouts or limits.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let beacon_defaults = BeaconSettings::default();
        let server_defaults = ServerSettings::default();

        let reconnect_delay = env.secs(
            "LIGHTHOUSE_RECONNECT_DELAY_SECS",
            beacon_defaults.reconnect_delay,
        );
        // An unset cap follows the delay so raising the delay alone is valid.
        let reconnect_delay_max = env.secs(
            "LIGHTHOUSE_RECONNECT_DELAY_MAX_SECS",
            beacon_defaults.reconnect_delay_max.max(reconnect_delay),
        );

        let beacon = BeaconSettings {
            host: env.string("LIGHTHOUSE_HOST", &beacon_defaults.host)?,
            port: env.parse("LIGHTHOUSE_PORT", beacon_defaults.port),
            connect_timeout: env.secs(
                "LIGHTHOUSE_CONNECT_TIMEOUT_SECS",
                beacon_defaults.connect_timeout,
            ),
            read_timeout: env.millis("LIGHTHOUSE_READ_TIMEOUT_MS", beacon_defaults.read_timeout),
            max_idle_reads: env.parse("LIGHTHOUSE_MAX_IDLE_READS", beacon_defaults.max_idle_reads),
            max_buffer_bytes: env.parse(
                "LIGHTHOUSE_MAX_BUFFER_BYTES",
                beacon_defaults.max_buffer_bytes,
            ),
            reconnect_delay,
            reconnect_delay_max,
            reconnect_multiplier: env.parse(
                "LIGHTHOUSE_RECONNECT_MULTIPLIER",
                beacon_defaults.reconnect_multiplier,
            ),
            reconnect_jitter: env.parse(
                "LIGHTHOUSE_RECONNECT_JITTER",
                beacon_defaults.reconnect_jitter,
            ),
            max_reconnect_attempts: env.parse(
                "LIGHTHOUSE_MAX_RECONNECT_ATTEMPTS",
                beacon_defaults.max_reconnect_attempts,
            ),
        };

        let server = ServerSettings {
            host: env.string("BRIDGE_API_HOST", &server_defaults.host)?,
            port: env.parse("BRIDGE_API_PORT", server_defaults.port),
        };

        let freshness = FreshnessWindow::new(env.secs(
            "BRIDGE_FRESHNESS_WINDOW_SECS",
            FreshnessWindow::default().duration(),
        ));

        let config = Self {
            beacon,
            server,
            freshness,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.beacon;
        if b.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("LIGHTHOUSE_CONNECT_TIMEOUT_SECS"));
        }
        if b.read_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("LIGHTHOUSE_READ_TIMEOUT_MS"));
        }
        if b.max_idle_reads == 0 {
            return Err(ConfigError::InvalidValue("LIGHTHOUSE_MAX_IDLE_READS"));
        }
        if b.max_buffer_bytes == 0 {
            return Err(ConfigError::InvalidValue("LIGHTHOUSE_MAX_BUFFER_BYTES"));
        }
        if !b.reconnect_multiplier.is_finite() || b.reconnect_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue("LIGHTHOUSE_RECONNECT_MULTIPLIER"));
        }
        if !(0.0..1.0).contains(&b.reconnect_jitter) {
            return Err(ConfigError::InvalidValue("LIGHTHOUSE_RECONNECT_JITTER"));
        }
        if b.reconnect_delay_max < b.reconnect_delay {
            return Err(ConfigError::InvalidValue(
                "LIGHTHOUSE_RECONNECT_DELAY_MAX_SECS",
            ));
        }
        if self.freshness.duration().is_zero() {
            return Err(ConfigError::InvalidValue("BRIDGE_FRESHNESS_WINDOW_SECS"));
        }
        Ok(())
    }

    /// `host:port` of the beacon.
    #[must_use]
    pub fn beacon_addr(&self) -> String {
        format!("{}:{}", self.beacon.host, self.beacon.port)
    }

    /// `host:port` the HTTP server binds.
    #[must_use]
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(&'static str),
    /// Environment variable has an unusable value.
    #[error("environment variable {0} has an invalid value")]
    InvalidValue(&'static str),
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &'static str, default: &str) -> Result<String, ConfigError> {
        match (self.0)(key) {
            Some(value) if value.trim().is_empty() => Err(ConfigError::EmptyValue(key)),
            Some(value) => Ok(value.trim().to_string()),
            None => Ok(default.to_string()),
        }
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        (self.0)(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        (self.0)(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        (self.0)(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
