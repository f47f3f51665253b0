//! JSON-RPC 2.0 envelopes and MCP convention types
//!
//! Shape validation happens here, before anything reaches the
//! application handler. `id` values are opaque (string or number) and
//! round-trip unchanged between request and response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC request or notification (notification when `id` is absent)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object; also the structured error type the
/// application handler returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// `-32601` per JSON-RPC
    pub fn method_not_found(method: &str) -> Self {
        Self::new(-32601, format!("Method not found: {}", method))
    }

    /// `-32602` per JSON-RPC
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(-32602, message)
    }

    /// `-32603` per JSON-RPC
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(-32603, message)
    }
}

impl RpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// A validated inbound JSON-RPC message
#[derive(Debug, Clone)]
pub enum RpcEnvelope {
    Request(RpcRequest),
    Notification(RpcRequest),
    Response(RpcResponse),
}

/// Shape-validation failure. Carries the request `id` when one could
/// be recovered from the malformed body, so the transport can still
/// emit a correlated error response.
#[derive(Debug, Clone)]
pub struct ShapeError {
    pub id: Option<Value>,
    pub reason: String,
}

impl std::fmt::Display for ShapeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

fn valid_id(id: &Value) -> bool {
    id.is_string() || id.is_number()
}

fn recover_id(value: &Value) -> Option<Value> {
    value.get("id").filter(|id| valid_id(id)).cloned()
}

impl RpcEnvelope {
    /// Validate a parsed JSON value as a Request, Notification, or
    /// Response envelope.
    pub fn parse(value: Value) -> std::result::Result<Self, ShapeError> {
        let obj = match value.as_object() {
            Some(obj) => obj,
            None => {
                return Err(ShapeError {
                    id: None,
                    reason: "envelope must be a JSON object".to_string(),
                })
            }
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return Err(ShapeError {
                id: recover_id(&value),
                reason: "missing or unsupported jsonrpc version".to_string(),
            });
        }

        let id = obj.get("id").cloned();
        if let Some(ref id) = id {
            if !valid_id(id) {
                return Err(ShapeError {
                    id: None,
                    reason: "id must be a string or number".to_string(),
                });
            }
        }

        if let Some(method) = obj.get("method") {
            let method = match method.as_str() {
                Some(m) => m.to_string(),
                None => {
                    return Err(ShapeError {
                        id,
                        reason: "method must be a string".to_string(),
                    })
                }
            };
            let request = RpcRequest {
                jsonrpc: "2.0".to_string(),
                id: id.clone(),
                method,
                params: obj.get("params").cloned().unwrap_or(Value::Null),
            };
            return Ok(match id {
                Some(_) => RpcEnvelope::Request(request),
                None => RpcEnvelope::Notification(request),
            });
        }

        let result = obj.get("result").cloned();
        let error = obj.get("error").cloned();
        match (id, result, error) {
            (Some(id), Some(result), None) => Ok(RpcEnvelope::Response(RpcResponse::success(
                Some(id),
                result,
            ))),
            (Some(id), None, Some(error)) => {
                let error: RpcError = serde_json::from_value(error).map_err(|e| ShapeError {
                    id: None,
                    reason: format!("malformed error object: {}", e),
                })?;
                Ok(RpcEnvelope::Response(RpcResponse::error(Some(id), error)))
            }
            (recovered, _, _) => Err(ShapeError {
                id: recovered,
                reason: "response must carry an id and exactly one of result/error".to_string(),
            }),
        }
    }
}

/// Standard MCP methods
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const LIST_TOOLS: &str = "tools/list";
    pub const CALL_TOOL: &str = "tools/call";
}

/// MCP tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// MCP initialize result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// Server capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Server info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for InitializeResult {
    fn default() -> Self {
        Self {
            protocol_version: "2024-11-05".to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: ServerInfo {
                name: "sse-bridge".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

/// Tool call result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
}

impl ToolCallResult {
    /// Create a text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_request() {
        let envelope = RpcEnvelope::parse(json!({
            "jsonrpc": "2.0",
            "id": "init-1",
            "method": "initialize",
            "params": {},
        }))
        .unwrap();

        match envelope {
            RpcEnvelope::Request(req) => {
                assert_eq!(req.id, Some(json!("init-1")));
                assert_eq!(req.method, "initialize");
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_notification() {
        let envelope = RpcEnvelope::parse(json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
        }))
        .unwrap();
        assert!(matches!(envelope, RpcEnvelope::Notification(_)));
    }

    #[test]
    fn test_parse_response_with_numeric_id() {
        let envelope = RpcEnvelope::parse(json!({
            "jsonrpc": "2.0",
            "id": 7,
            "result": {"ok": true},
        }))
        .unwrap();
        match envelope {
            RpcEnvelope::Response(resp) => assert_eq!(resp.id, Some(json!(7))),
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_jsonrpc_version_recovers_id() {
        let err = RpcEnvelope::parse(json!({
            "id": "req-9",
            "method": "tools/list",
        }))
        .unwrap_err();
        assert_eq!(err.id, Some(json!("req-9")));
    }

    #[test]
    fn test_non_string_method_rejected() {
        let err = RpcEnvelope::parse(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": 42,
        }))
        .unwrap_err();
        assert_eq!(err.id, Some(json!(1)));
    }

    #[test]
    fn test_object_id_rejected_without_recovery() {
        let err = RpcEnvelope::parse(json!({
            "jsonrpc": "2.0",
            "id": {"nested": true},
            "method": "x",
        }))
        .unwrap_err();
        assert_eq!(err.id, None);
    }

    #[test]
    fn test_result_and_error_together_rejected() {
        let err = RpcEnvelope::parse(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": null,
            "error": {"code": -1, "message": "x"},
        }))
        .unwrap_err();
        assert_eq!(err.id, Some(json!(1)));
    }

    #[test]
    fn test_non_object_envelope_rejected() {
        assert!(RpcEnvelope::parse(json!([1, 2, 3])).is_err());
        assert!(RpcEnvelope::parse(json!("hello")).is_err());
    }

    #[test]
    fn test_response_serialization_skips_absent_fields() {
        let resp = RpcResponse::success(Some(json!("a")), json!({"v": 1}));
        let text = serde_json::to_string(&resp).unwrap();
        assert!(!text.contains("error"));
    }
}
