//! Idle Monitor
//!
//! The beacon link has no ping/pong, so liveness is inferred from traffic.
//! Each read waits at most `read_timeout`; a timeout alone is normal idle
//! behavior. Only `max_idle_reads` consecutive timeouts without a complete
//! segment mark the connection as dead.

use std::time::Duration;

/// Configuration for idle escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleConfig {
    /// Upper bound on a single read wait.
    pub read_timeout: Duration,
    /// Consecutive read timeouts tolerated before forcing a reconnect.
    pub max_idle_reads: u32,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(2),
            max_idle_reads: 15,
        }
    }
}

impl IdleConfig {
    /// Create a new configuration.
    #[must_use]
    pub const fn new(read_timeout: Duration, max_idle_reads: u32) -> Self {
        Self {
            read_timeout,
            max_idle_reads,
        }
    }

    /// Create configuration from `BeaconSettings`.
    #[must_use]
    pub const fn from_beacon_settings(settings: &crate::BeaconSettings) -> Self {
        Self {
            read_timeout: settings.read_timeout,
            max_idle_reads: settings.max_idle_reads,
        }
    }
}

/// Outcome of a read timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleVerdict {
    /// Keep waiting.
    Idle {
        /// Consecutive timeouts so far.
        consecutive: u32,
    },
    /// Too long without data; reconnect.
    Dead {
        /// Total silence observed.
        silence: Duration,
    },
}

/// Per-connection idle tracker.
#[derive(Debug)]
pub struct IdleMonitor {
    config: IdleConfig,
    consecutive: u32,
}

impl IdleMonitor {
    /// Create a tracker for a fresh connection.
    #[must_use]
    pub const fn new(config: IdleConfig) -> Self {
        Self {
            config,
            consecutive: 0,
        }
    }

    /// Per-read wait bound.
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        self.config.read_timeout
    }

    /// Record that a read wait elapsed without a complete segment.
    pub fn on_timeout(&mut self) -> IdleVerdict {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive >= self.config.max_idle_reads {
            IdleVerdict::Dead {
                silence: self.config.read_timeout.saturating_mul(self.consecutive),
            }
        } else {
            IdleVerdict::Idle {
                consecutive: self.consecutive,
            }
        }
    }

    /// Record traffic.
    pub const fn on_activity(&mut self) {
        self.consecutive = 0;
    }
}
