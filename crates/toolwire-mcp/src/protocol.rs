//! MCP protocol types.
//!
//! Implements the JSON-RPC based MCP protocol, tools subset.
//! See: <https://spec.modelcontextprotocol.io/>

use crate::error::{McpError, McpResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol version.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Method names used by the client.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
}

/// JSON-RPC "method not found" error code.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC request (or notification if id is None).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// Request ID. None for notifications (which don't expect a response).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Check if this is a notification (no response expected).
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Split into the result value or the error object.
    ///
    /// A response carrying neither yields `Value::Null`.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// JSON-RPC error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC notification (no id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a new JSON-RPC notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A request sent by the worker to the client.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    /// Worker-chosen id, echoed back verbatim.
    pub id: Value,
    pub method: String,
    pub params: Option<Value>,
}

/// Any inbound JSON-RPC message, classified by shape.
#[derive(Debug, Clone)]
pub enum JsonRpcMessage {
    /// Has an `id` and a `result` or `error`.
    Response(JsonRpcResponse),
    /// Has a `method` but no `id`.
    Notification(JsonRpcNotification),
    /// Has both a `method` and an `id`.
    Request(IncomingRequest),
}

impl JsonRpcMessage {
    /// Classify a decoded JSON document.
    pub fn from_value(value: Value) -> McpResult<Self> {
        let Value::Object(ref object) = value else {
            return Err(McpError::protocol_error("message is not a JSON object"));
        };

        let id = object.get("id").filter(|id| !id.is_null()).cloned();

        if let Some(method) = object.get("method").and_then(Value::as_str) {
            let method = method.to_string();
            let params = object.get("params").cloned();
            return Ok(match id {
                Some(id) => Self::Request(IncomingRequest { id, method, params }),
                None => Self::Notification(JsonRpcNotification::new(method, params)),
            });
        }

        if id.is_some() && (object.contains_key("result") || object.contains_key("error")) {
            let response: JsonRpcResponse = serde_json::from_value(value)
                .map_err(|e| McpError::protocol_error(format!("invalid response: {e}")))?;
            return Ok(Self::Response(response));
        }

        Err(McpError::protocol_error(
            "message is neither a request, a response nor a notification",
        ))
    }
}

/// MCP initialization parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: ClientInfo,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo::default(),
        }
    }
}

/// Client capabilities. The client advertises none.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {}

/// Client info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "toolwire".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// MCP initialization result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
}

/// Server capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

/// Tools capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(default)]
    pub list_changed: bool,
}

/// Server info.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// MCP tool definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    /// Tool name.
    pub name: String,
    /// Tool description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// List tools result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<McpTool>,
}

/// Tool call parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    pub arguments: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_rpc_request_serialization() {
        let req = JsonRpcRequest::new(1, "initialize", Some(json!({"test": true})));
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"initialize\""));
    }

    #[test]
    fn test_notification_has_no_id() {
        let note = JsonRpcNotification::new(methods::INITIALIZED, None);
        let value = serde_json::to_value(&note).unwrap();
        assert!(value.get("id").is_none());
        assert!(value.get("params").is_none());
        assert_eq!(value["method"], "notifications/initialized");
    }

    #[test]
    fn test_initialize_params() {
        let params = serde_json::to_value(InitializeParams::default()).unwrap();
        assert_eq!(params["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(params["capabilities"], json!({}));
        assert_eq!(params["clientInfo"]["name"], "toolwire");
    }

    #[test]
    fn test_initialize_result_is_lenient() {
        let result: InitializeResult =
            serde_json::from_value(json!({"capabilities": {"tools": {}}})).unwrap();
        assert!(result.capabilities.tools.is_some());
        assert!(result.server_info.name.is_empty());
    }

    #[test]
    fn test_classify_response() {
        let msg = JsonRpcMessage::from_value(json!({"jsonrpc": "2.0", "id": 7, "result": {}}))
            .unwrap();
        match msg {
            JsonRpcMessage::Response(r) => {
                assert_eq!(r.id, 7);
                assert_eq!(r.into_result().unwrap(), json!({}));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_error_response() {
        let msg = JsonRpcMessage::from_value(
            json!({"jsonrpc": "2.0", "id": 3, "error": {"code": -1, "message": "boom"}}),
        )
        .unwrap();
        let JsonRpcMessage::Response(r) = msg else {
            panic!("expected response");
        };
        let err = r.into_result().unwrap_err();
        assert_eq!(err.code, -1);
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn test_classify_notification_and_request() {
        let note = JsonRpcMessage::from_value(
            json!({"jsonrpc": "2.0", "method": "notifications/progress", "params": {"p": 1}}),
        )
        .unwrap();
        assert!(matches!(
            note,
            JsonRpcMessage::Notification(n) if n.method == "notifications/progress"
        ));

        let req = JsonRpcMessage::from_value(
            json!({"jsonrpc": "2.0", "id": "srv-1", "method": "roots/list"}),
        )
        .unwrap();
        assert!(matches!(req, JsonRpcMessage::Request(r) if r.id == json!("srv-1")));
    }

    #[test]
    fn test_classify_rejects_garbage() {
        assert!(JsonRpcMessage::from_value(json!([1, 2])).is_err());
        assert!(JsonRpcMessage::from_value(json!({"jsonrpc": "2.0", "id": 1})).is_err());
        assert!(JsonRpcMessage::from_value(json!({"id": "x", "result": {}})).is_err());
    }

    #[test]
    fn test_tool_descriptor_deserialization() {
        let result: ListToolsResult = serde_json::from_value(json!({
            "tools": [
                {"name": "analyze_job", "description": "Analyze a job post", "inputSchema": {"type": "object"}},
                {"name": "ping"}
            ]
        }))
        .unwrap();
        assert_eq!(result.tools.len(), 2);
        assert_eq!(result.tools[0].input_schema, Some(json!({"type": "object"})));
        assert!(result.tools[1].description.is_none());
    }
}
