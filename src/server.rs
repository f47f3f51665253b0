//! HTTP endpoint adapter
//!
//! Binds the duplex sessions to plain HTTP: `GET /sse` opens a stream
//! and announces the POST endpoint, `POST /messages` (with or without
//! a trailing slash, never redirected) feeds the matching session, and
//! `GET /health` answers liveness probes.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Deserialize;
use tokio_stream::wrappers::{IntervalStream, ReceiverStream};
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::BridgeError;
use crate::registry::SessionRegistry;
use crate::rpc::{RpcEnvelope, RpcError};
use crate::session::RpcHandler;
use crate::sse;

/// Characters escaped when embedding the session id in the announced
/// query string
const QUERY_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'&')
    .add(b'+');

/// Transport configuration. All knobs are policy, not protocol.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path serving the SSE stream
    pub sse_path: String,
    /// Path accepting JSON-RPC POSTs; mounted both with and without a
    /// trailing slash to tolerate inconsistent clients
    pub message_path: String,
    /// Cadence of keepalive comment frames; zero disables them
    pub keepalive: Duration,
    /// Per-session inbound queue depth
    pub inbound_capacity: usize,
    /// Per-session outbound queue depth
    pub outbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            sse_path: "/sse".to_string(),
            message_path: "/messages".to_string(),
            keepalive: Duration::from_secs(15),
            inbound_capacity: 64,
            outbound_capacity: 256,
        }
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Shared state behind the routes
#[derive(Clone)]
struct AppState {
    registry: Arc<SessionRegistry>,
    handler: Arc<dyn RpcHandler>,
    config: Arc<ServerConfig>,
}

/// The SSE bridge server
pub struct SseServer {
    handler: Arc<dyn RpcHandler>,
    config: ServerConfig,
    addr: SocketAddr,
}

impl SseServer {
    pub fn new(handler: Arc<dyn RpcHandler>, config: ServerConfig, addr: SocketAddr) -> Self {
        Self {
            handler,
            config,
            addr,
        }
    }

    /// Build the router
    pub fn router(handler: Arc<dyn RpcHandler>, config: ServerConfig) -> Router {
        let mut config = config;
        config.sse_path = normalize_path(&config.sse_path);
        config.message_path = normalize_path(&config.message_path);

        let state = AppState {
            registry: Arc::new(SessionRegistry::new()),
            handler,
            config: Arc::new(config),
        };

        let mut router = Router::new()
            .route(&state.config.sse_path, get(sse_handler))
            .route(&state.config.message_path, post(message_handler))
            .route("/health", get(health_handler));

        // Axum never auto-redirects on trailing slashes, so the slash
        // variant is a distinct route and must be mounted explicitly.
        if state.config.message_path != "/" {
            let with_slash = format!("{}/", state.config.message_path);
            router = router.route(&with_slash, post(message_handler));
        }

        router
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Start the server
    pub async fn start(self) -> std::io::Result<()> {
        let app = Self::router(self.handler, self.config);

        tracing::info!("SSE bridge listening on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "ok"
}

/// Open a stream: create a session, announce its POST endpoint, then
/// drain the outbound queue to the client until either side hangs up.
async fn sse_handler(State(state): State<AppState>) -> Response {
    let config = &state.config;
    let (session, channels) = state
        .registry
        .create(config.inbound_capacity, config.outbound_capacity);

    let endpoint = format!(
        "{}?session_id={}",
        config.message_path,
        utf8_percent_encode(session.id(), QUERY_ESCAPES)
    );
    if let Err(e) = session.announce(&endpoint) {
        tracing::error!(session_id = %session.id(), "failed to announce endpoint: {}", e);
        state.registry.remove(session.id());
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to open session").into_response();
    }
    tracing::info!(session_id = %session.id(), "stream opened");

    tokio::spawn(session.clone().run(
        channels.inbound_rx,
        state.handler.clone(),
        state.registry.clone(),
    ));

    let events = ReceiverStream::new(channels.outbound_rx)
        .map(|event| Ok::<_, Infallible>(Bytes::from(sse::encode(&event))));

    let body = if config.keepalive > Duration::ZERO {
        let start = tokio::time::Instant::now() + config.keepalive;
        let ticks = IntervalStream::new(tokio::time::interval_at(start, config.keepalive))
            .map(|_| Ok::<_, Infallible>(Bytes::from(sse::encode_comment("keepalive"))));
        Body::from_stream(events.merge(ticks))
    } else {
        Body::from_stream(events)
    };

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct MessageParams {
    session_id: Option<String>,
}

/// Accept one JSON-RPC envelope and hand it to the session named in
/// the query. The acknowledgement is immediate; any result arrives
/// later on the GET stream, never in this response body.
async fn message_handler(
    State(state): State<AppState>,
    Query(params): Query<MessageParams>,
    body: String,
) -> (StatusCode, &'static str) {
    let Some(session_id) = params.session_id else {
        return (StatusCode::BAD_REQUEST, "session_id is required");
    };

    let Some(session) = state.registry.lookup(&session_id) else {
        tracing::warn!(session_id = %session_id, "post to unknown session");
        return (StatusCode::NOT_FOUND, "Could not find session");
    };

    let value: serde_json::Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(session_id = %session_id, "unparseable message body: {}", e);
            return (StatusCode::BAD_REQUEST, "Could not parse message");
        }
    };

    let envelope = match RpcEnvelope::parse(value) {
        Ok(envelope) => envelope,
        Err(shape) => {
            tracing::warn!(session_id = %session_id, "invalid envelope: {}", shape);
            // If the id survived the damage, the client still gets a
            // correlated error response on its stream.
            if let Some(id) = shape.id {
                let err = BridgeError::InvalidEnvelope(shape.reason);
                let error = RpcError::new(err.code(), err.to_string());
                if let Err(e) = session.send_protocol_error(id, error) {
                    tracing::debug!(session_id = %session_id, "could not deliver protocol error: {}", e);
                }
            }
            return (StatusCode::BAD_REQUEST, "Invalid JSON-RPC envelope");
        }
    };

    match session.post(envelope) {
        Ok(()) => (StatusCode::ACCEPTED, "Accepted"),
        Err(BridgeError::Backpressure(_)) => {
            (StatusCode::TOO_MANY_REQUESTS, "Session queue is full")
        }
        Err(_) => (StatusCode::CONFLICT, "Session is not open"),
    }
}
