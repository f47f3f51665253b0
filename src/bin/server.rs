//! SSE bridge server
//!
//! Run with: sse-bridge-server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sse_bridge::rpc::{
    methods, InitializeResult, RpcError, ToolCallResult, ToolDefinition,
};
use sse_bridge::session::{RpcHandler, SessionContext};
use sse_bridge::{ServerConfig, SseServer};

#[derive(Parser, Debug)]
#[command(name = "sse-bridge-server")]
#[command(about = "MCP-over-SSE bridge server")]
struct Args {
    /// Bind host
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Bind port
    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Path serving the SSE stream
    #[arg(long, env = "MCP_SSE_PATH", default_value = "/sse")]
    sse_path: String,

    /// Path accepting JSON-RPC POSTs (trailing-slash variant is
    /// mounted as well)
    #[arg(long, env = "MCP_MESSAGE_PATH", default_value = "/messages")]
    message_path: String,

    /// Keepalive comment cadence in seconds (0 = disabled)
    #[arg(long, env = "MCP_KEEPALIVE_SECONDS", default_value = "15")]
    keepalive_seconds: u64,
}

/// Built-in handler exposing a single `ping` tool.
///
/// Stands in for a real application so the transport is exercisable
/// out of the box; deployments embed their own [`RpcHandler`].
struct PingHandler;

impl PingHandler {
    fn tools() -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "ping".to_string(),
            description: "Echo back the provided message with a timestamp".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "message": {"type": "string"}
                }
            }),
        }]
    }
}

#[async_trait]
impl RpcHandler for PingHandler {
    async fn initialize(
        &self,
        _params: Value,
        ctx: &SessionContext,
    ) -> Result<Value, RpcError> {
        tracing::info!(session_id = %ctx.session_id(), "client initialized");
        serde_json::to_value(InitializeResult::default())
            .map_err(|e| RpcError::internal(e.to_string()))
    }

    async fn call(
        &self,
        method: &str,
        params: Value,
        _ctx: &SessionContext,
    ) -> Result<Value, RpcError> {
        match method {
            methods::LIST_TOOLS => Ok(json!({ "tools": Self::tools() })),
            methods::CALL_TOOL => {
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::invalid_params("tool name is required"))?;
                if name != "ping" {
                    return Err(RpcError::invalid_params(format!("unknown tool: {}", name)));
                }
                let message = params
                    .pointer("/arguments/message")
                    .and_then(Value::as_str)
                    .unwrap_or("pong");
                let result = ToolCallResult::text(format!(
                    "{} (at {})",
                    message,
                    chrono::Utc::now().to_rfc3339()
                ));
                serde_json::to_value(result).map_err(|e| RpcError::internal(e.to_string()))
            }
            other => Err(RpcError::method_not_found(other)),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let config = ServerConfig {
        sse_path: args.sse_path,
        message_path: args.message_path,
        keepalive: Duration::from_secs(args.keepalive_seconds),
        ..ServerConfig::default()
    };

    let server = SseServer::new(Arc::new(PingHandler), config, addr);
    server.start().await?;

    Ok(())
}
