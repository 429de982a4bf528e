//! Lighthouse Bridge Binary
//!
//! Connects to the lighthouse beacon and serves its latest reading over HTTP.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin lighthouse-bridge
//! ```
//!
//! # Environment Variables
//!
//! - `LIGHTHOUSE_HOST` / `LIGHTHOUSE_PORT`: beacon address (default: 127.0.0.1:9876)
//! - `BRIDGE_API_HOST` / `BRIDGE_API_PORT`: HTTP bind address (default: 0.0.0.0:8080)
//! - `BRIDGE_FRESHNESS_WINDOW_SECS`: staleness window (default: 60)
//! - `LIGHTHOUSE_RECONNECT_DELAY_SECS`: delay between attempts (default: 10)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use lighthouse_bridge::application::services;
use lighthouse_bridge::infrastructure::beacon::{CollectorConfig, StreamCollector};
use lighthouse_bridge::infrastructure::http::{QueryServer, QueryServerState};
use lighthouse_bridge::infrastructure::telemetry;
use lighthouse_bridge::{BridgeConfig, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Upper bound on waiting for the collector after shutdown is requested.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting lighthouse bridge");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = BridgeConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let (publisher, handle) = services::channel(config.freshness);
    let collector = Arc::new(StreamCollector::new(
        CollectorConfig::from_beacon_settings(&config.beacon),
        publisher,
        shutdown_token.child_token(),
    ));
    collector.start();

    let api_addr = resolve(&config.api_addr()).await?;
    let state = Arc::new(QueryServerState::new(
        Arc::new(handle),
        config.beacon_addr(),
        env!("CARGO_PKG_VERSION"),
    ));
    let server = QueryServer::new(api_addr, state, shutdown_token.clone());
    let server_task = tokio::spawn(server.run());

    tracing::info!("Lighthouse bridge ready");

    tokio::select! {
        () = await_shutdown() => {}
        result = server_task => {
            collector.stop();
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e).context("query server failed"),
                Err(e) => Err(e).context("query server task failed"),
            };
        }
    }

    shutdown_token.cancel();
    collector.stop();

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, collector.wait()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Beacon collector ended with error"),
        Err(_) => tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Beacon collector did not stop in time"
        ),
    }

    tracing::info!("Lighthouse bridge stopped");
    Ok(())
}

async fn resolve(addr: &str) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("cannot resolve {addr}"))?
        .next()
        .with_context(|| format!("no address for {addr}"))
}

/// Log the parsed configuration.
fn log_config(config: &BridgeConfig) {
    tracing::info!(
        beacon = %config.beacon_addr(),
        api = %config.api_addr(),
        freshness_secs = config.freshness.duration().as_secs(),
        "Configuration loaded"
    );
    tracing::debug!(
        connect_timeout_secs = config.beacon.connect_timeout.as_secs(),
        read_timeout_ms = config.beacon.read_timeout.as_millis(),
        max_idle_reads = config.beacon.max_idle_reads,
        reconnect_delay_secs = config.beacon.reconnect_delay.as_secs(),
        max_reconnect_attempts = config.beacon.max_reconnect_attempts,
        "Beacon link settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
