//! Beacon Stream Collector
//!
//! Owns the TCP link to the beacon for the lifetime of the process:
//!
//! ```text
//!            ┌──────────── delay ─────────────┐
//!            ▼                                │
//! Disconnected ──► Connecting ──► Streaming ──┘
//!      │               │              │
//!      └───────────────┴──── stop ────┴──► Stopped
//! ```
//!
//! Every accepted record is published to the shared reading state. Readers
//! never touch the socket; the collector never waits on readers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use super::codec::{BeaconCodec, DEFAULT_MAX_BUFFER, FrameError, SegmentOutcome, decode_segment};
use super::idle::{IdleConfig, IdleMonitor, IdleVerdict};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::services::{ReadingHandle, ReadingPublisher};
use crate::domain::reading::LinkState;
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end a beacon session or the collector itself.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// TCP connect failed.
    #[error("connection to {addr} failed: {source}")]
    ConnectFailed {
        /// Beacon address.
        addr: String,
        /// Underlying socket error.
        source: std::io::Error,
    },

    /// TCP connect did not complete in time.
    #[error("connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Beacon address.
        addr: String,
        /// Configured connect timeout.
        timeout: Duration,
    },

    /// No complete segment for too long.
    #[error("no beacon data for {0:?}")]
    IdleTimeout(Duration),

    /// Framing failed (socket error or buffer overflow).
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),

    /// The collector task panicked or was aborted.
    #[error("collector task failed: {0}")]
    TaskFailed(String),
}

impl CollectorError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConnectFailed { .. } => "connect_failed",
            Self::ConnectTimeout { .. } => "connect_timeout",
            Self::IdleTimeout(_) => "idle_timeout",
            Self::Frame(FrameError::BufferOverflow { .. }) => "buffer_overflow",
            Self::Frame(FrameError::Io(_)) => "read_error",
            Self::MaxReconnectAttemptsExceeded(_) => "max_attempts",
            Self::TaskFailed(_) => "task_failed",
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the stream collector.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Beacon host.
    pub host: String,
    /// Beacon port.
    pub port: u16,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Read timeout and idle escalation.
    pub idle: IdleConfig,
    /// Bound on bytes buffered without a separator.
    pub max_buffer: usize,
    /// Delay schedule between connection attempts.
    pub reconnect: ReconnectConfig,
}

impl CollectorConfig {
    /// Configuration with default timeouts for the given beacon.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(10),
            idle: IdleConfig::default(),
            max_buffer: DEFAULT_MAX_BUFFER,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Create configuration from `BeaconSettings`.
    #[must_use]
    pub fn from_beacon_settings(settings: &crate::BeaconSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            connect_timeout: settings.connect_timeout,
            idle: IdleConfig::from_beacon_settings(settings),
            max_buffer: settings.max_buffer_bytes,
            reconnect: ReconnectConfig::from_beacon_settings(settings),
        }
    }

    /// `host:port` for logs.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Collector
// =============================================================================

/// How a streaming session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The beacon closed the connection.
    PeerClosed,
    /// Shutdown was requested.
    Cancelled,
}

/// Background beacon reader.
///
/// Manages the connection lifecycle including:
/// - Bounded connect and per-read timeouts
/// - Idle escalation to reconnect
/// - Fixed-delay reconnection (configurable backoff)
/// - Publishing accepted records
pub struct StreamCollector {
    config: CollectorConfig,
    publisher: ReadingPublisher,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<Result<(), CollectorError>>>>,
    last_accepted: Mutex<Option<Instant>>,
}

impl StreamCollector {
    /// Create a new collector. Nothing runs until [`StreamCollector::start`].
    #[must_use]
    pub const fn new(
        config: CollectorConfig,
        publisher: ReadingPublisher,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            publisher,
            cancel,
            task: Mutex::new(None),
            last_accepted: Mutex::new(None),
        }
    }

    /// A read handle onto the state this collector publishes to.
    #[must_use]
    pub fn handle(&self) -> ReadingHandle {
        self.publisher.handle()
    }

    /// Spawn the reconnect loop on the current Tokio runtime.
    ///
    /// Returns `false` if the loop was already started.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock();
        if task.is_some() {
            tracing::warn!("Beacon collector already started");
            return false;
        }

        let collector = Arc::clone(self);
        *task = Some(tokio::spawn(async move { collector.run().await }));
        true
    }

    /// Request shutdown.
    ///
    /// Cancels any pending connect, read or reconnect delay and marks the
    /// link as stopped. The last record stays readable. Does not wait for
    /// the task to exit; see [`StreamCollector::wait`].
    pub fn stop(&self) {
        tracing::info!("Stopping beacon collector");
        self.cancel.cancel();
        self.publisher.set_link_state(LinkState::Stopped);
        metrics::set_beacon_connected(false);
    }

    /// Wait for a started loop to finish.
    ///
    /// # Errors
    ///
    /// Returns the loop's error, or `TaskFailed` if the task panicked.
    pub async fn wait(&self) -> Result<(), CollectorError> {
        let task = self.task.lock().take();
        match task {
            Some(handle) => handle
                .await
                .map_err(|e| CollectorError::TaskFailed(e.to_string()))?,
            None => Ok(()),
        }
    }

    /// Run the reconnect loop until stopped.
    ///
    /// # Errors
    ///
    /// Returns `MaxReconnectAttemptsExceeded` when a retry limit is
    /// configured and exhausted. With the default policy it only returns on
    /// shutdown.
    pub async fn run(&self) -> Result<(), CollectorError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        let result = loop {
            if self.cancel.is_cancelled() {
                break Ok(());
            }

            self.publisher.set_link_state(LinkState::Connecting);
            self.publisher.record_connection_attempt();
            metrics::record_connection_attempt();

            let connected = tokio::select! {
                () = self.cancel.cancelled() => break Ok(()),
                result = self.connect() => result,
            };

            match connected {
                Ok(stream) => {
                    policy.reset();
                    let end = self.stream_from(stream).await;
                    self.set_disconnected();

                    match end {
                        Ok(SessionEnd::Cancelled) => break Ok(()),
                        Ok(SessionEnd::PeerClosed) => {
                            tracing::warn!("Beacon closed the connection");
                            metrics::record_connection_error("peer_closed");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Beacon stream error");
                            metrics::record_connection_error(e.kind());
                        }
                    }
                }
                Err(e) => {
                    self.set_disconnected();
                    tracing::warn!(error = %e, "Beacon connection error");
                    metrics::record_connection_error(e.kind());
                }
            }

            let Some(delay) = policy.next_delay() else {
                break Err(CollectorError::MaxReconnectAttemptsExceeded(
                    policy.attempt_count(),
                ));
            };

            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting to beacon"
            );

            tokio::select! {
                () = self.cancel.cancelled() => break Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        };

        self.publisher.set_link_state(LinkState::Stopped);
        metrics::set_beacon_connected(false);
        match &result {
            Ok(()) => tracing::info!("Beacon collector stopped"),
            Err(e) => tracing::error!(error = %e, "Beacon collector gave up"),
        }
        result
    }

    async fn connect(&self) -> Result<TcpStream, CollectorError> {
        let addr = self.config.address();
        tracing::info!(addr = %addr, "Connecting to beacon");

        let connect = TcpStream::connect((self.config.host.as_str(), self.config.port));
        match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(CollectorError::ConnectFailed { addr, source }),
            Err(_) => Err(CollectorError::ConnectTimeout {
                addr,
                timeout: self.config.connect_timeout,
            }),
        }
    }

    /// Drive one connected session until it ends.
    ///
    /// Marks the link as streaming, then reads segments with a fresh parse
    /// buffer, publishing every accepted record. A read timeout only counts
    /// toward idle escalation.
    ///
    /// # Errors
    ///
    /// Returns `IdleTimeout` after too many consecutive empty reads and
    /// `Frame` on socket errors or buffer overflow.
    pub async fn stream_from<R>(&self, io: R) -> Result<SessionEnd, CollectorError>
    where
        R: AsyncRead + Unpin,
    {
        self.publisher.set_link_state(LinkState::Streaming);
        metrics::set_beacon_connected(true);
        tracing::info!(addr = %self.config.address(), "Connected to beacon");

        let mut frames = FramedRead::new(io, BeaconCodec::new(self.config.max_buffer));
        let mut idle = IdleMonitor::new(self.config.idle);

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                next = tokio::time::timeout(idle.read_timeout(), frames.next()) => next,
            };

            match next {
                Err(_elapsed) => match idle.on_timeout() {
                    IdleVerdict::Idle { consecutive } => {
                        tracing::trace!(consecutive, "No beacon data yet");
                    }
                    IdleVerdict::Dead { silence } => {
                        return Err(CollectorError::IdleTimeout(silence));
                    }
                },
                Ok(None) => return Ok(SessionEnd::PeerClosed),
                Ok(Some(Ok(segment))) => {
                    idle.on_activity();
                    self.handle_segment(&segment);
                }
                Ok(Some(Err(e))) => return Err(e.into()),
            }
        }
    }

    fn handle_segment(&self, segment: &[u8]) {
        let outcome = decode_segment(segment);
        if let Some(reason) = outcome.reject_reason() {
            self.publisher.record_rejected();
            metrics::record_segment_rejected(reason);
        }

        match outcome {
            SegmentOutcome::Record(record) => {
                tracing::info!(
                    lighthouse_id = record.id(),
                    sequence = ?record.sequence_number(),
                    "Beacon record accepted"
                );
                tracing::debug!(
                    parse_time_us = ?record.get("json_parse_time_microseconds"),
                    "Beacon parse timing"
                );

                let now = Instant::now();
                if let Some(previous) = self.last_accepted.lock().replace(now) {
                    metrics::record_record_interval(now.duration_since(previous));
                }
                metrics::record_record_accepted();
                self.publisher.publish(record);
            }
            SegmentOutcome::Blank => {}
            SegmentOutcome::NotObject => {
                tracing::debug!(bytes = segment.len(), "Skipping non-object segment");
            }
            SegmentOutcome::Malformed(error) => {
                tracing::warn!(error = %error, "Failed to parse beacon segment");
            }
            SegmentOutcome::NotBeaconData(reason) => {
                tracing::warn!(reason = %reason, "Discarding object: not beacon data");
            }
        }
    }

    fn set_disconnected(&self) {
        if !self.cancel.is_cancelled() {
            self.publisher.set_link_state(LinkState::Disconnected);
        }
        metrics::set_beacon_connected(false);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::application::ports::ReadingSource;
    use crate::application::services;
    use crate::domain::reading::{ConnectionStatus, FreshnessWindow};

    fn separator() -> String {
        "=".repeat(80)
    }

    fn frame(seq: u64) -> String {
        format!(
            "{}\n{}\n\n",
            json!({"lighthouse_id": "A", "beacon_sequence_number": seq}),
            separator()
        )
    }

    fn collector_with(config: CollectorConfig) -> (Arc<StreamCollector>, ReadingHandle) {
        let (publisher, handle) = services::channel(FreshnessWindow::default());
        let collector = Arc::new(StreamCollector::new(
            config,
            publisher,
            CancellationToken::new(),
        ));
        (collector, handle)
    }

    fn test_config() -> CollectorConfig {
        CollectorConfig {
            idle: IdleConfig::new(Duration::from_millis(50), 4),
            reconnect: ReconnectConfig::fixed(Duration::from_millis(20)),
            ..CollectorConfig::new("127.0.0.1", 1)
        }
    }

    #[tokio::test]
    async fn session_publishes_records_and_ends_on_peer_close() {
        let (collector, handle) = collector_with(test_config());
        let (mut beacon, bridge) = tokio::io::duplex(1024);

        let writer = tokio::spawn(async move {
            beacon.write_all(frame(1).as_bytes()).await.unwrap();
            beacon.write_all(b"not json").await.unwrap();
            beacon.write_all(separator().as_bytes()).await.unwrap();
            beacon.write_all(frame(2).as_bytes()).await.unwrap();
            beacon.write_all(b"{\"lighthouse_id\":\"A\",\"beacon_seq").await.unwrap();
        });

        let end = collector.stream_from(bridge).await.unwrap();
        writer.await.unwrap();

        assert_eq!(end, SessionEnd::PeerClosed);
        let current = handle.read_current().unwrap();
        assert_eq!(current.record.sequence_number(), Some(2));
        let status = handle.status();
        assert_eq!(status.records_accepted, 2);
        assert_eq!(status.segments_rejected, 1);
    }

    #[tokio::test]
    async fn record_split_across_writes_is_decoded_once() {
        let (collector, handle) = collector_with(test_config());
        let (mut beacon, bridge) = tokio::io::duplex(64);

        let payload = frame(11);
        let writer = tokio::spawn(async move {
            for chunk in payload.as_bytes().chunks(7) {
                beacon.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        collector.stream_from(bridge).await.unwrap();
        writer.await.unwrap();

        assert_eq!(handle.status().records_accepted, 1);
        assert_eq!(
            handle.read_current().unwrap().record.sequence_number(),
            Some(11)
        );
    }

    #[tokio::test]
    async fn idle_link_escalates_to_error() {
        let (collector, _handle) = collector_with(test_config());
        let (_beacon, bridge) = tokio::io::duplex(64);

        let err = collector.stream_from(bridge).await.unwrap_err();
        assert!(matches!(err, CollectorError::IdleTimeout(_)));
        assert_eq!(err.kind(), "idle_timeout");
    }

    #[tokio::test]
    async fn trickling_data_without_records_still_escalates() {
        let (collector, _handle) = collector_with(test_config());
        let (mut beacon, bridge) = tokio::io::duplex(64);

        let writer = tokio::spawn(async move {
            for _ in 0..20 {
                if beacon.write_all(b" ").await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(30)).await;
            }
        });

        let err = collector.stream_from(bridge).await.unwrap_err();
        assert!(matches!(err, CollectorError::IdleTimeout(_)));
        writer.abort();
    }

    #[tokio::test]
    async fn oversized_segment_fails_the_session() {
        let config = CollectorConfig {
            max_buffer: 128,
            ..test_config()
        };
        let (collector, _handle) = collector_with(config);
        let (mut beacon, bridge) = tokio::io::duplex(1024);

        let writer = tokio::spawn(async move {
            let _ = beacon.write_all(&[b'{'; 512]).await;
            beacon
        });

        let err = collector.stream_from(bridge).await.unwrap_err();
        assert_eq!(err.kind(), "buffer_overflow");
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn stop_cancels_session_and_keeps_data() {
        let (collector, handle) = collector_with(test_config());
        let (mut beacon, bridge) = tokio::io::duplex(1024);
        beacon.write_all(frame(5).as_bytes()).await.unwrap();

        let session = {
            let collector = Arc::clone(&collector);
            tokio::spawn(async move { collector.stream_from(bridge).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        collector.stop();

        let end = session.await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::Cancelled);

        let current = handle.read_current().unwrap();
        assert_eq!(current.record.sequence_number(), Some(5));
        assert_eq!(current.connection_status, ConnectionStatus::Disconnected);
        assert_eq!(handle.link_state(), LinkState::Stopped);
        drop(beacon);
    }

    #[tokio::test]
    async fn unreachable_beacon_respects_attempt_limit() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = CollectorConfig {
            reconnect: ReconnectConfig {
                max_attempts: 2,
                ..ReconnectConfig::fixed(Duration::from_millis(10))
            },
            ..CollectorConfig::new("127.0.0.1", port)
        };
        let (collector, handle) = collector_with(config);

        let err = collector.run().await.unwrap_err();
        assert!(matches!(err, CollectorError::MaxReconnectAttemptsExceeded(2)));

        let status = handle.status();
        assert_eq!(status.connection_attempts, 3);
        assert_eq!(status.link_state, LinkState::Stopped);
        assert!(!status.has_data);
    }

    /// A listener whose accept queue is full, so new connects never complete.
    async fn saturated_listener() -> (tokio::net::TcpListener, u16, Vec<TcpStream>) {
        let socket = tokio::net::TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(1).unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut held = Vec::new();
        loop {
            let attempt = tokio::time::timeout(
                Duration::from_millis(200),
                TcpStream::connect(("127.0.0.1", port)),
            );
            match attempt.await {
                Ok(Ok(stream)) => held.push(stream),
                Ok(Err(e)) => panic!("filling accept queue failed: {e}"),
                Err(_) => break,
            }
            assert!(held.len() < 64, "accept queue never filled");
        }
        (listener, port, held)
    }

    #[tokio::test]
    async fn connect_times_out_when_beacon_never_accepts() {
        let (_listener, port, _held) = saturated_listener().await;

        let config = CollectorConfig {
            connect_timeout: Duration::from_millis(200),
            ..CollectorConfig::new("127.0.0.1", port)
        };
        let (collector, _handle) = collector_with(config);

        let err = collector.connect().await.unwrap_err();
        assert!(matches!(err, CollectorError::ConnectTimeout { .. }));
        assert_eq!(err.kind(), "connect_timeout");
    }

    #[tokio::test]
    async fn connect_timeout_leaves_link_disconnected() {
        let (_listener, port, _held) = saturated_listener().await;

        let config = CollectorConfig {
            connect_timeout: Duration::from_millis(200),
            reconnect: ReconnectConfig::fixed(Duration::from_secs(60)),
            ..CollectorConfig::new("127.0.0.1", port)
        };
        let (collector, handle) = collector_with(config);
        assert!(collector.start());

        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.status().connection_attempts == 0
                || handle.link_state() != LinkState::Disconnected
            {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("link should drop back to disconnected after the timeout");

        let status = handle.status();
        assert_eq!(status.connection_attempts, 1);
        assert!(!status.connected);

        collector.stop();
        collector.wait().await.unwrap();
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (collector, _handle) = collector_with(test_config());

        assert!(collector.start());
        assert!(!collector.start());

        collector.stop();
        tokio::time::timeout(Duration::from_secs(1), collector.wait())
            .await
            .expect("collector should exit promptly after stop")
            .unwrap();
    }
}
