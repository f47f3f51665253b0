//! Probe client
//!
//! A minimal client side of the bridge protocol, used to validate a
//! running server end to end: open the stream, learn the POST endpoint
//! from the announcement, send `initialize` + `tools/list`, then read
//! `message` events until the listing response is correlated by id or
//! the wait budget elapses.

use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::header;
use reqwest::Url;
use serde_json::{json, Value};

use crate::error::{BridgeError, Result};
use crate::rpc::{methods, RpcRequest, ToolDefinition};
use crate::sse::SseStreamDecoder;

const INIT_ID: &str = "init-1";
const LIST_ID: &str = "list-1";

/// Probe configuration
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Server base URL, no trailing slash
    pub base_url: String,
    /// SSE path on the server
    pub sse_path: String,
    /// Protocol version sent in `initialize`
    pub protocol_version: String,
    /// Overall wait budget for the correlated response
    pub max_wait: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            sse_path: "/sse".to_string(),
            protocol_version: "2024-11-05".to_string(),
            max_wait: Duration::from_secs(15),
        }
    }
}

/// What the probe observed
#[derive(Debug)]
pub struct ProbeReport {
    /// Resolved message URL from the endpoint announcement
    pub endpoint: Url,
    /// Tools advertised by the server
    pub tools: Vec<ToolDefinition>,
    pub elapsed: Duration,
}

/// Connect, initialize, and list the server's tools.
///
/// Tolerates interleaved heartbeats and out-of-order events; a missing
/// response is reported as [`BridgeError::Timeout`], not a crash.
pub async fn list_tools(config: &ProbeConfig) -> Result<ProbeReport> {
    let started = Instant::now();
    let outcome = tokio::time::timeout(config.max_wait, probe_stream(config)).await;
    match outcome {
        Ok(result) => result.map(|(endpoint, tools)| ProbeReport {
            endpoint,
            tools,
            elapsed: started.elapsed(),
        }),
        Err(_) => Err(BridgeError::Timeout(config.max_wait)),
    }
}

async fn probe_stream(config: &ProbeConfig) -> Result<(Url, Vec<ToolDefinition>)> {
    let base = Url::parse(&config.base_url)
        .map_err(|e| BridgeError::Config(format!("invalid base url: {}", e)))?;
    let sse_url = base
        .join(&config.sse_path)
        .map_err(|e| BridgeError::Config(format!("invalid sse path: {}", e)))?;

    let client = reqwest::Client::new();
    tracing::info!("opening SSE stream at {}", sse_url);
    let response = client
        .get(sse_url)
        .header(header::ACCEPT, "text/event-stream")
        .send()
        .await?
        .error_for_status()?;

    let mut stream = response.bytes_stream();
    let mut decoder = SseStreamDecoder::new();
    let mut message_url: Option<Url> = None;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for event in decoder.feed(&chunk) {
            match event.effective_name() {
                "endpoint" if message_url.is_none() => {
                    // The payload is a percent-encoded URL relative to
                    // the base; join preserves the encoding and the
                    // server decodes the query on its side.
                    let url = base.join(&event.data).map_err(|e| {
                        BridgeError::Internal(format!("unresolvable endpoint {:?}: {}", event.data, e))
                    })?;
                    tracing::debug!("endpoint announced: {}", url);

                    // Both requests go out before any further stream
                    // events are consumed.
                    post_request(
                        &client,
                        &url,
                        RpcRequest::new(
                            INIT_ID,
                            methods::INITIALIZE,
                            json!({
                                "protocolVersion": config.protocol_version,
                                "capabilities": {},
                                "clientInfo": {
                                    "name": "sse-bridge-probe",
                                    "version": env!("CARGO_PKG_VERSION"),
                                },
                            }),
                        ),
                    )
                    .await?;
                    post_request(
                        &client,
                        &url,
                        RpcRequest::new(LIST_ID, methods::LIST_TOOLS, json!({})),
                    )
                    .await?;

                    message_url = Some(url);
                }
                "message" => {
                    let msg: Value = match serde_json::from_str(&event.data) {
                        Ok(msg) => msg,
                        Err(_) => {
                            tracing::warn!("non-JSON message event: {}", event.data);
                            continue;
                        }
                    };
                    if msg.get("id") != Some(&json!(LIST_ID)) {
                        continue;
                    }
                    if let Some(error) = msg.get("error") {
                        return Err(BridgeError::Internal(format!(
                            "tools/list failed: {}",
                            error
                        )));
                    }
                    let tools = msg
                        .get("result")
                        .and_then(|result| result.get("tools"))
                        .cloned()
                        .map(serde_json::from_value)
                        .transpose()?
                        .unwrap_or_default();
                    let endpoint = message_url
                        .take()
                        .ok_or(BridgeError::MissingEndpoint)?;
                    return Ok((endpoint, tools));
                }
                other => {
                    tracing::debug!("ignoring {:?} event", other);
                }
            }
        }
    }

    // Stream ended before the listing response arrived.
    if message_url.is_none() {
        Err(BridgeError::MissingEndpoint)
    } else {
        Err(BridgeError::Internal(
            "stream closed before the tools/list response".to_string(),
        ))
    }
}

async fn post_request(client: &reqwest::Client, url: &Url, request: RpcRequest) -> Result<()> {
    tracing::debug!(method = %request.method, "posting request");
    client
        .post(url.clone())
        .json(&request)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}
