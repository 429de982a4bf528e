//! Query API
//!
//! Read-only HTTP facade over the latest beacon reading. Handlers only touch
//! the in-memory snapshot through `ReadingSource`, so a slow or dead beacon
//! never delays a response.
//!
//! # Endpoints
//!
//! - `GET /` - HTML status page
//! - `GET /api/lighthouse` - Latest fresh record, or a `no_data` body
//! - `GET /api/status` - Link and data status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (connected with fresh data)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    middleware::map_response,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::ReadingSource;
use crate::domain::reading::LinkState;
use crate::infrastructure::metrics::get_metrics_handle;

/// Paths advertised by the 404 fallback.
pub const AVAILABLE_ENDPOINTS: [&str; 2] = ["/api/lighthouse", "/api/status"];

// =============================================================================
// Response Types
// =============================================================================

/// Body of `GET /api/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Always "online" while the server answers.
    pub status: &'static str,
    /// Whether a live beacon socket is open.
    pub lighthouse_connected: bool,
    /// When the latest record was published, if ever.
    pub last_update: Option<String>,
    /// Whether any record has been published.
    pub has_data: bool,
    /// Response time.
    pub timestamp: String,
    /// Collector lifecycle state.
    pub link_state: LinkState,
    /// Records accepted since start.
    pub records_accepted: u64,
    /// Segments discarded since start.
    pub segments_rejected: u64,
    /// Connection attempts since start.
    pub connection_attempts: u64,
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

// =============================================================================
// Query Server State
// =============================================================================

/// Shared state for the query server.
pub struct QueryServerState {
    source: Arc<dyn ReadingSource>,
    beacon_addr: String,
    version: String,
    started_at: Instant,
}

impl QueryServerState {
    /// Create new query server state.
    #[must_use]
    pub fn new(
        source: Arc<dyn ReadingSource>,
        beacon_addr: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            source,
            beacon_addr: beacon_addr.into(),
            version: version.into(),
            started_at: Instant::now(),
        }
    }
}

/// Build the router with every endpoint and the response header layer.
#[must_use]
pub fn router(state: Arc<QueryServerState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/lighthouse", get(lighthouse_handler))
        .route("/api/status", get(status_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(not_found_handler)
        .layer(map_response(add_api_headers))
        .with_state(state)
}

// =============================================================================
// Query Server
// =============================================================================

/// HTTP query server.
pub struct QueryServer {
    addr: SocketAddr,
    state: Arc<QueryServerState>,
    cancel: CancellationToken,
}

impl QueryServer {
    /// Create a new query server.
    #[must_use]
    pub const fn new(
        addr: SocketAddr,
        state: Arc<QueryServerState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            addr,
            state,
            cancel,
        }
    }

    /// Bind and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `QueryServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), QueryServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| QueryServerError::BindFailed(self.addr, e.to_string()))?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `QueryServerError::ServerFailed` on a fatal server error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), QueryServerError> {
        let local = listener.local_addr().unwrap_or(self.addr);
        tracing::info!(addr = %local, beacon = %self.state.beacon_addr, "Query server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| QueryServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Query server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn lighthouse_handler(State(state): State<Arc<QueryServerState>>) -> Json<Value> {
    let timestamp = rfc3339(Utc::now());
    match state.source.read_current() {
        Some(record) => Json(json!({
            "status": "success",
            "data": record,
            "timestamp": timestamp,
        })),
        None => Json(json!({
            "status": "no_data",
            "message": "No recent lighthouse data available",
            "timestamp": timestamp,
            "connected": state.source.status().connected,
        })),
    }
}

async fn status_handler(State(state): State<Arc<QueryServerState>>) -> Json<StatusResponse> {
    let status = state.source.status();
    Json(StatusResponse {
        status: "online",
        lighthouse_connected: status.connected,
        last_update: status.last_update_time.map(rfc3339),
        has_data: status.has_data,
        timestamp: rfc3339(Utc::now()),
        link_state: status.link_state,
        records_accepted: status.records_accepted,
        segments_rejected: status.segments_rejected,
        connection_attempts: status.connection_attempts,
    })
}

async fn index_handler(State(state): State<Arc<QueryServerState>>) -> Html<String> {
    Html(render_index(&state))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<QueryServerState>>) -> impl IntoResponse {
    if state.source.status().connected && state.source.read_current().is_some() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::CONTENT_TYPE, "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

async fn not_found_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "status": "error",
            "message": "Endpoint not found",
            "available_endpoints": AVAILABLE_ENDPOINTS,
        })),
    )
}

async fn add_api_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    response
}

fn render_index(state: &QueryServerState) -> String {
    let status = state.source.status();
    let link = if status.connected {
        "Connected"
    } else {
        "Disconnected"
    };
    let last_update = status
        .last_update_time
        .map_or_else(|| "Never".to_string(), rfc3339);
    let has_data = if status.has_data { "Yes" } else { "No" };
    let endpoints: String = AVAILABLE_ENDPOINTS
        .iter()
        .map(|path| format!("<li><a href=\"{path}\">{path}</a></li>"))
        .collect();

    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head><title>Lighthouse API Bridge</title></head>\n\
         <body>\n\
         <h1>Lighthouse API Bridge</h1>\n\
         <p><strong>Status:</strong> {link}</p>\n\
         <p><strong>Last Update:</strong> {last_update}</p>\n\
         <p><strong>Has Data:</strong> {has_data}</p>\n\
         <h2>API Endpoints:</h2>\n\
         <ul>{endpoints}</ul>\n\
         <p><em>Beacon: {beacon}, version {version}, up {uptime}s</em></p>\n\
         </body>\n\
         </html>\n",
        beacon = escape_html(&state.beacon_addr),
        version = escape_html(&state.version),
        uptime = state.started_at.elapsed().as_secs(),
    )
}

fn escape_html(raw: &str) -> String {
    raw.chars().fold(String::with_capacity(raw.len()), |mut out, c| {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
        out
    })
}

// =============================================================================
// Errors
// =============================================================================

/// Query server errors.
#[derive(Debug, thiserror::Error)]
pub enum QueryServerError {
    /// Failed to bind the listen address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Map;
    use tower::ServiceExt;

    use super::*;
    use crate::domain::beacon::BeaconRecord;
    use crate::domain::reading::{CollectorStatus, ConnectionStatus, EnrichedRecord};

    struct StubSource {
        current: Option<EnrichedRecord>,
        status: Mutex<CollectorStatus>,
    }

    impl ReadingSource for StubSource {
        fn read_current(&self) -> Option<EnrichedRecord> {
            self.current.clone()
        }

        fn status(&self) -> CollectorStatus {
            self.status.lock().unwrap().clone()
        }
    }

    fn idle_status() -> CollectorStatus {
        CollectorStatus {
            connected: false,
            link_state: LinkState::Disconnected,
            last_update_time: None,
            has_data: false,
            records_accepted: 0,
            segments_rejected: 0,
            connection_attempts: 3,
        }
    }

    fn enriched() -> EnrichedRecord {
        let mut fields = Map::new();
        fields.insert("lighthouse_id".into(), json!("LH-1"));
        fields.insert("beacon_sequence_number".into(), json!(7));
        EnrichedRecord {
            record: BeaconRecord::from_fields(fields).unwrap(),
            connection_status: ConnectionStatus::Connected,
            last_update_time: DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            age_seconds: 4,
        }
    }

    fn app(source: StubSource) -> Router {
        router(Arc::new(QueryServerState::new(
            Arc::new(source),
            "127.0.0.1:9876",
            "0.1.0",
        )))
    }

    async fn get_json(app: Router, path: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn lighthouse_without_data_reports_no_data() {
        let (status, body) = get_json(
            app(StubSource {
                current: None,
                status: Mutex::new(idle_status()),
            }),
            "/api/lighthouse",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "no_data");
        assert_eq!(body["message"], "No recent lighthouse data available");
        assert_eq!(body["connected"], false);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn lighthouse_with_data_returns_enriched_record() {
        let mut status = idle_status();
        status.connected = true;
        let (code, body) = get_json(
            app(StubSource {
                current: Some(enriched()),
                status: Mutex::new(status),
            }),
            "/api/lighthouse",
        )
        .await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"]["lighthouse_id"], "LH-1");
        assert_eq!(body["data"]["beacon_sequence_number"], 7);
        assert_eq!(body["data"]["connection_status"], "connected");
        assert_eq!(body["data"]["last_update_time"], "2025-03-01T12:00:00Z");
        assert_eq!(body["data"]["age_seconds"], 4);
    }

    #[tokio::test]
    async fn status_reports_counters() {
        let (code, body) = get_json(
            app(StubSource {
                current: None,
                status: Mutex::new(idle_status()),
            }),
            "/api/status",
        )
        .await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "online");
        assert_eq!(body["lighthouse_connected"], false);
        assert_eq!(body["last_update"], Value::Null);
        assert_eq!(body["has_data"], false);
        assert_eq!(body["link_state"], "disconnected");
        assert_eq!(body["connection_attempts"], 3);
    }

    #[tokio::test]
    async fn unknown_path_lists_endpoints() {
        let (code, body) = get_json(
            app(StubSource {
                current: None,
                status: Mutex::new(idle_status()),
            }),
            "/api/nope",
        )
        .await;

        assert_eq!(code, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Endpoint not found");
        assert_eq!(
            body["available_endpoints"],
            json!(["/api/lighthouse", "/api/status"])
        );
    }

    #[tokio::test]
    async fn every_response_carries_api_headers() {
        for path in ["/", "/api/status", "/healthz", "/missing"] {
            let response = app(StubSource {
                current: None,
                status: Mutex::new(idle_status()),
            })
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();

            let headers = response.headers();
            assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*", "{path}");
            assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "GET");
            assert_eq!(
                headers[header::CACHE_CONTROL],
                "no-cache, no-store, must-revalidate"
            );
        }
    }

    #[tokio::test]
    async fn readiness_requires_link_and_fresh_data() {
        let response = app(StubSource {
            current: Some(enriched()),
            status: Mutex::new(idle_status()),
        })
        .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let mut connected = idle_status();
        connected.connected = true;
        let response = app(StubSource {
            current: Some(enriched()),
            status: Mutex::new(connected),
        })
        .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn index_page_shows_link_and_beacon() {
        let response = app(StubSource {
            current: None,
            status: Mutex::new(idle_status()),
        })
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("Disconnected"));
        assert!(html.contains("Never"));
        assert!(html.contains("127.0.0.1:9876"));
        assert!(html.contains("href=\"/api/lighthouse\""));
    }

    #[test]
    fn escape_html_replaces_markup() {
        assert_eq!(escape_html("<a&\"b\">"), "&lt;a&amp;&quot;b&quot;&gt;");
    }
}
