//! End-to-end transport tests
//!
//! Each test boots the real server on an ephemeral TCP port, talks to
//! it with a plain streaming HTTP client, and checks the protocol
//! behavior a conforming MCP client would observe.
//!
//! Run with: cargo test --test transport_tests

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::time::timeout;

use sse_bridge::rpc::RpcError;
use sse_bridge::session::{RpcHandler, SessionContext};
use sse_bridge::sse::{SseEvent, SseStreamDecoder};
use sse_bridge::{ServerConfig, SseServer};

const EVENT_WAIT: Duration = Duration::from_secs(5);

struct DemoHandler;

#[async_trait]
impl RpcHandler for DemoHandler {
    async fn initialize(
        &self,
        _params: Value,
        _ctx: &SessionContext,
    ) -> Result<Value, RpcError> {
        Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {"listChanged": false}},
            "serverInfo": {"name": "demo", "version": "0.0.0"},
        }))
    }

    async fn call(
        &self,
        method: &str,
        params: Value,
        _ctx: &SessionContext,
    ) -> Result<Value, RpcError> {
        match method {
            "tools/list" => Ok(json!({
                "tools": [{
                    "name": "demo",
                    "description": "A demo tool",
                    "inputSchema": {"type": "object"},
                }]
            })),
            "demo/echo" => Ok(params),
            "demo/fail" => Err(RpcError::internal("deliberate failure")),
            "demo/stall" => {
                // Parks the message loop so inbound posts pile up
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(json!({}))
            }
            other => Err(RpcError::method_not_found(other)),
        }
    }
}

async fn start_server() -> SocketAddr {
    start_server_with(ServerConfig::default()).await
}

async fn start_server_with(config: ServerConfig) -> SocketAddr {
    let router = SseServer::router(Arc::new(DemoHandler), config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Streaming SSE reader over a live GET response
struct EventReader {
    stream: std::pin::Pin<
        Box<dyn futures::Stream<Item = reqwest::Result<axum::body::Bytes>> + Send>,
    >,
    decoder: SseStreamDecoder,
    pending: VecDeque<SseEvent>,
}

impl EventReader {
    async fn open(client: &reqwest::Client, addr: SocketAddr) -> Self {
        let response = client
            .get(format!("http://{}/sse", addr))
            .header("accept", "text/event-stream")
            .send()
            .await
            .unwrap()
            .error_for_status()
            .unwrap();
        Self {
            stream: Box::pin(response.bytes_stream()),
            decoder: SseStreamDecoder::new(),
            pending: VecDeque::new(),
        }
    }

    async fn next_event(&mut self) -> Option<SseEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            let chunk = timeout(EVENT_WAIT, self.stream.next())
                .await
                .ok()??
                .ok()?;
            self.pending.extend(self.decoder.feed(&chunk));
        }
    }

    /// Read `message` events until one carries the given id
    async fn wait_for_id(&mut self, id: &Value) -> Value {
        loop {
            let event = self
                .next_event()
                .await
                .unwrap_or_else(|| panic!("stream ended waiting for id {}", id));
            if event.effective_name() != "message" {
                continue;
            }
            let msg: Value = serde_json::from_str(&event.data).unwrap();
            if msg.get("id") == Some(id) {
                return msg;
            }
        }
    }
}

/// Open a stream and return the reader plus the resolved message URL
async fn open_session(client: &reqwest::Client, addr: SocketAddr) -> (EventReader, String) {
    let mut reader = EventReader::open(client, addr).await;
    let endpoint = reader.next_event().await.expect("no endpoint event");
    assert_eq!(endpoint.effective_name(), "endpoint");
    let url = format!("http://{}{}", addr, endpoint.data);
    (reader, url)
}

async fn post_json(client: &reqwest::Client, url: &str, body: Value) -> reqwest::StatusCode {
    client
        .post(url)
        .header("content-type", "application/json")
        .body(body.to_string())
        .send()
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn test_endpoint_event_is_first() {
    let addr = start_server().await;
    let client = reqwest::Client::new();
    let mut reader = EventReader::open(&client, addr).await;

    let first = reader.next_event().await.unwrap();
    assert_eq!(first.effective_name(), "endpoint");
    assert!(
        first.data.starts_with("/messages?session_id="),
        "unexpected endpoint payload: {}",
        first.data
    );
}

#[tokio::test]
async fn test_initialize_yields_correlated_result() {
    let addr = start_server().await;
    let client = reqwest::Client::new();
    let (mut reader, url) = open_session(&client, addr).await;

    let status = post_json(
        &client,
        &url,
        json!({"jsonrpc": "2.0", "id": "init-1", "method": "initialize", "params": {}}),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::ACCEPTED);

    let msg = reader.wait_for_id(&json!("init-1")).await;
    assert!(msg.get("result").is_some());
    assert_eq!(msg["result"]["protocolVersion"], json!("2024-11-05"));
}

#[tokio::test]
async fn test_follow_up_request_correlates_by_id() {
    let addr = start_server().await;
    let client = reqwest::Client::new();
    let (mut reader, url) = open_session(&client, addr).await;

    post_json(
        &client,
        &url,
        json!({"jsonrpc": "2.0", "id": "init-1", "method": "initialize", "params": {}}),
    )
    .await;
    post_json(
        &client,
        &url,
        json!({"jsonrpc": "2.0", "id": 42, "method": "demo/echo", "params": {"k": "v"}}),
    )
    .await;

    let msg = reader.wait_for_id(&json!(42)).await;
    assert_eq!(msg["result"], json!({"k": "v"}));
}

#[tokio::test]
async fn test_handler_failure_surfaces_as_error_response() {
    let addr = start_server().await;
    let client = reqwest::Client::new();
    let (mut reader, url) = open_session(&client, addr).await;

    post_json(
        &client,
        &url,
        json!({"jsonrpc": "2.0", "id": "i", "method": "initialize", "params": {}}),
    )
    .await;
    post_json(
        &client,
        &url,
        json!({"jsonrpc": "2.0", "id": "f", "method": "demo/fail", "params": {}}),
    )
    .await;

    let msg = reader.wait_for_id(&json!("f")).await;
    assert_eq!(msg["error"]["code"], json!(-32603));
    assert!(msg.get("result").is_none());
}

#[tokio::test]
async fn test_unknown_session_is_rejected_without_side_effects() {
    let addr = start_server().await;
    let client = reqwest::Client::new();
    let (mut reader, url) = open_session(&client, addr).await;

    let status = post_json(
        &client,
        &format!("http://{}/messages?session_id=zzz", addr),
        json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::NOT_FOUND);

    // The open session is untouched and still serviceable.
    post_json(
        &client,
        &url,
        json!({"jsonrpc": "2.0", "id": "alive", "method": "initialize", "params": {}}),
    )
    .await;
    let msg = reader.wait_for_id(&json!("alive")).await;
    assert!(msg.get("result").is_some());
}

#[tokio::test]
async fn test_missing_session_id_is_bad_request() {
    let addr = start_server().await;
    let client = reqwest::Client::new();

    let status = post_json(
        &client,
        &format!("http://{}/messages", addr),
        json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_json_body_leaves_session_open() {
    let addr = start_server().await;
    let client = reqwest::Client::new();
    let (mut reader, url) = open_session(&client, addr).await;

    let status = client
        .post(&url)
        .header("content-type", "application/json")
        .body("this is not json")
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);

    post_json(
        &client,
        &url,
        json!({"jsonrpc": "2.0", "id": "still-here", "method": "initialize", "params": {}}),
    )
    .await;
    let msg = reader.wait_for_id(&json!("still-here")).await;
    assert!(msg.get("result").is_some());
}

#[tokio::test]
async fn test_malformed_envelope_with_recoverable_id_gets_error_on_stream() {
    let addr = start_server().await;
    let client = reqwest::Client::new();
    let (mut reader, url) = open_session(&client, addr).await;

    // Valid JSON, but no jsonrpc version: shape violation with a
    // recoverable id.
    let status = post_json(
        &client,
        &url,
        json!({"id": "broken-1", "method": "initialize"}),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);

    let msg = reader.wait_for_id(&json!("broken-1")).await;
    assert_eq!(msg["error"]["code"], json!(-32600));
    assert!(
        msg["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid JSON-RPC envelope"),
        "unexpected error message: {}",
        msg["error"]["message"]
    );
}

#[tokio::test]
async fn test_trailing_slash_post_path_accepted() {
    let addr = start_server().await;
    let client = reqwest::Client::new();
    let (mut reader, url) = open_session(&client, addr).await;

    let slashed = url.replace("/messages?", "/messages/?");
    let status = post_json(
        &client,
        &slashed,
        json!({"jsonrpc": "2.0", "id": "s", "method": "initialize", "params": {}}),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::ACCEPTED);

    let msg = reader.wait_for_id(&json!("s")).await;
    assert!(msg.get("result").is_some());
}

#[tokio::test]
async fn test_no_response_leaks_between_sessions() {
    let addr = start_server().await;
    let client = reqwest::Client::new();
    let (mut reader_a, url_a) = open_session(&client, addr).await;
    let (mut reader_b, _url_b) = open_session(&client, addr).await;

    post_json(
        &client,
        &url_a,
        json!({"jsonrpc": "2.0", "id": "only-a", "method": "initialize", "params": {}}),
    )
    .await;

    let msg = reader_a.wait_for_id(&json!("only-a")).await;
    assert!(msg.get("result").is_some());

    // Session B sees nothing within a short grace period.
    let leaked = timeout(Duration::from_millis(500), reader_b.next_event()).await;
    assert!(leaked.is_err(), "event leaked to unrelated session");
}

#[tokio::test]
async fn test_notification_produces_no_stream_traffic() {
    let addr = start_server().await;
    let client = reqwest::Client::new();
    let (mut reader, url) = open_session(&client, addr).await;

    let status = post_json(
        &client,
        &url,
        json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::ACCEPTED);

    post_json(
        &client,
        &url,
        json!({"jsonrpc": "2.0", "id": "after-note", "method": "initialize", "params": {}}),
    )
    .await;

    // First message event is the initialize reply; the notification
    // contributed nothing to the stream.
    let msg = reader.wait_for_id(&json!("after-note")).await;
    assert!(msg.get("result").is_some());
}

#[tokio::test]
async fn test_inbound_queue_full_is_backpressure_not_teardown() {
    let addr = start_server_with(ServerConfig {
        inbound_capacity: 1,
        ..ServerConfig::default()
    })
    .await;
    let client = reqwest::Client::new();
    let (mut reader, url) = open_session(&client, addr).await;

    post_json(
        &client,
        &url,
        json!({"jsonrpc": "2.0", "id": "i", "method": "initialize", "params": {}}),
    )
    .await;
    reader.wait_for_id(&json!("i")).await;

    // First stall gets dequeued into the handler and parks the loop.
    let status = post_json(
        &client,
        &url,
        json!({"jsonrpc": "2.0", "id": "stall-0", "method": "demo/stall", "params": {}}),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::ACCEPTED);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // With the loop parked and capacity 1, the flood must hit the
    // full queue within a couple of posts.
    let mut saw_backpressure = false;
    for n in 1..10 {
        let status = post_json(
            &client,
            &url,
            json!({"jsonrpc": "2.0", "id": format!("stall-{}", n), "method": "demo/stall", "params": {}}),
        )
        .await;
        assert!(
            status == reqwest::StatusCode::ACCEPTED
                || status == reqwest::StatusCode::TOO_MANY_REQUESTS,
            "unexpected status {}",
            status
        );
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            saw_backpressure = true;
            break;
        }
    }
    assert!(saw_backpressure, "queue never reported as full");

    // Backpressure is not teardown: the session is still registered
    // and open, so a further post is rejected for capacity only.
    let status = post_json(
        &client,
        &url,
        json!({"jsonrpc": "2.0", "id": "again", "method": "demo/stall", "params": {}}),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_post_after_disconnect_is_rejected() {
    let addr = start_server().await;
    let client = reqwest::Client::new();
    let (reader, url) = open_session(&client, addr).await;

    // Client hangs up; the session drains, closes, and deregisters.
    drop(reader);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let status = post_json(
        &client,
        &url,
        json!({"jsonrpc": "2.0", "id": "late", "method": "initialize", "params": {}}),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_keepalive_comments_are_transparent_to_decoder() {
    let addr = start_server_with(ServerConfig {
        keepalive: Duration::from_millis(50),
        ..ServerConfig::default()
    })
    .await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{}/sse", addr))
        .header("accept", "text/event-stream")
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();
    let mut stream = Box::pin(response.bytes_stream());

    // Collect a few keepalive periods of raw bytes.
    let mut raw = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_millis(400);
    while tokio::time::Instant::now() < deadline {
        match timeout(Duration::from_millis(200), stream.next()).await {
            Ok(Some(Ok(chunk))) => raw.extend_from_slice(&chunk),
            _ => break,
        }
    }

    let text = String::from_utf8_lossy(&raw);
    assert!(
        text.contains(": keepalive"),
        "no comment frames on the wire: {:?}",
        text
    );

    // Comment frames never surface as events.
    let mut decoder = SseStreamDecoder::new();
    let events = decoder.feed(&raw);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].effective_name(), "endpoint");
}

#[tokio::test]
async fn test_health_endpoint() {
    let addr = start_server().await;
    let body = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn test_probe_end_to_end() {
    let addr = start_server().await;

    let config = sse_bridge::probe::ProbeConfig {
        base_url: format!("http://{}", addr),
        max_wait: Duration::from_secs(10),
        ..sse_bridge::probe::ProbeConfig::default()
    };
    let report = sse_bridge::probe::list_tools(&config).await.unwrap();

    assert_eq!(report.tools.len(), 1);
    assert_eq!(report.tools[0].name, "demo");
}
