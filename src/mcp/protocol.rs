use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use super::error::McpError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Error codes surfaced to clients
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const TOOL_EXECUTION_ERROR: i32 = -32000;
    pub const TOOL_NOT_FOUND: i32 = -32001;
    pub const PRIVILEGE_REQUIRED: i32 = -32002;
    pub const TEMPORARILY_UNAVAILABLE: i32 = -32003;
}

/// One unit of the request/response/notification protocol
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: Value,
    pub method: String,
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: Value,
    pub payload: ResponsePayload,
}

/// A response carries exactly one of these
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    Result(Value),
    Error(ErrorObject),
}

/// JSON-RPC error structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i32, message: String, data: Option<Value>) -> Self {
        Self {
            code,
            message,
            data,
        }
    }

    pub fn parse_error(detail: &str) -> Self {
        Self::new(
            error_codes::PARSE_ERROR,
            "Parse error".to_string(),
            Some(serde_json::json!({ "error": detail })),
        )
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", method),
            None,
        )
    }

    pub fn invalid_params(msg: &str) -> Self {
        Self::new(
            error_codes::INVALID_PARAMS,
            "Invalid params".to_string(),
            Some(serde_json::json!({ "error": msg })),
        )
    }

    pub fn internal_error(msg: &str) -> Self {
        Self::new(
            error_codes::INTERNAL_ERROR,
            "Internal error".to_string(),
            Some(serde_json::json!({ "error": msg })),
        )
    }
}

impl Request {
    pub fn new(id: impl Into<Value>, method: &str, params: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            method: method.to_string(),
            params,
        }
    }
}

impl Notification {
    pub fn new(method: &str, params: Map<String, Value>) -> Self {
        Self {
            method: method.to_string(),
            params,
        }
    }
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            payload: ResponsePayload::Result(result),
        }
    }

    pub fn error(id: Value, error: ErrorObject) -> Self {
        Self {
            id,
            payload: ResponsePayload::Error(error),
        }
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.payload {
            ResponsePayload::Result(value) => Some(value),
            ResponsePayload::Error(_) => None,
        }
    }

    pub fn error_object(&self) -> Option<&ErrorObject> {
        match &self.payload {
            ResponsePayload::Error(error) => Some(error),
            ResponsePayload::Result(_) => None,
        }
    }
}

impl Message {
    /// Parse one wire payload. The kind is decided by which fields are present.
    pub fn parse(text: &str) -> Result<Self, McpError> {
        let wire: WireMessage =
            serde_json::from_str(text).map_err(|e| McpError::Parse(e.to_string()))?;
        Self::try_from(wire)
    }

    pub fn to_json(&self) -> Result<String, McpError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(req) => Some(&req.method),
            Self::Notification(note) => Some(&note.method),
            Self::Response(_) => None,
        }
    }

    pub fn id(&self) -> Option<&Value> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Response(resp) => Some(&resp.id),
            Self::Notification(_) => None,
        }
    }
}

impl From<Request> for Message {
    fn from(req: Request) -> Self {
        Self::Request(req)
    }
}

impl From<Response> for Message {
    fn from(resp: Response) -> Self {
        Self::Response(resp)
    }
}

impl From<Notification> for Message {
    fn from(note: Notification) -> Self {
        Self::Notification(note)
    }
}

/// Flat wire shape shared by all three kinds. Unset fields are omitted on output.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jsonrpc: Option<String>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    params: Option<Value>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorObject>,
}

// Distinguishes `"id": null` (present) from a missing field.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

fn params_map(params: Option<Value>) -> Result<Map<String, Value>, McpError> {
    match params {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(McpError::Parse(format!(
            "params must be an object, got {}",
            other
        ))),
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = McpError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        if let Some(version) = wire.jsonrpc.as_deref() {
            if version != JSONRPC_VERSION {
                return Err(McpError::Parse(format!(
                    "unsupported jsonrpc version: {}",
                    version
                )));
            }
        }

        match (wire.method, wire.id) {
            (Some(method), id) => {
                if wire.result.is_some() || wire.error.is_some() {
                    return Err(McpError::Parse(
                        "message carries both a method and a result/error".to_string(),
                    ));
                }
                let params = params_map(wire.params)?;
                Ok(match id {
                    Some(id) => Self::Request(Request { id, method, params }),
                    None => Self::Notification(Notification { method, params }),
                })
            }
            (None, Some(id)) => match (wire.result, wire.error) {
                (Some(result), None) => Ok(Self::Response(Response::success(id, result))),
                (None, Some(error)) => Ok(Self::Response(Response::error(id, error))),
                _ => Err(McpError::Parse(
                    "response must carry exactly one of result or error".to_string(),
                )),
            },
            (None, None) => Err(McpError::Parse(
                "message is not a request, response or notification".to_string(),
            )),
        }
    }
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        let params = |map: &Map<String, Value>| {
            if map.is_empty() {
                None
            } else {
                Some(Value::Object(map.clone()))
            }
        };
        let mut wire = WireMessage {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            ..Default::default()
        };
        match message {
            Message::Request(req) => {
                wire.id = Some(req.id.clone());
                wire.method = Some(req.method.clone());
                wire.params = params(&req.params);
            }
            Message::Notification(note) => {
                wire.method = Some(note.method.clone());
                wire.params = params(&note.params);
            }
            Message::Response(resp) => {
                wire.id = Some(resp.id.clone());
                match &resp.payload {
                    ResponsePayload::Result(value) => wire.result = Some(value.clone()),
                    ResponsePayload::Error(error) => wire.error = Some(error.clone()),
                }
            }
        }
        wire
    }
}

impl Serialize for Message {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        WireMessage::from(self).serialize(serializer)
    }
}

// MCP-specific types

/// MCP Tool definition as listed to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Response for tools/list method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolListResponse {
    pub tools: Vec<Tool>,
}

/// Request for tools/call method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Map<String, Value>>,
}

/// Response for tools/call method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResponse {
    pub content: Vec<ToolContent>,
    #[serde(
        rename = "structuredContent",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub structured_content: Option<Value>,
    #[serde(rename = "isError", default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResponse {
    pub fn text(text: String) -> Self {
        Self {
            content: vec![ToolContent::Text { text }],
            structured_content: None,
            is_error: None,
        }
    }

    /// Render a tool's return value. Strings pass through, everything else is
    /// pretty-printed and also attached as structured content.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(text) => Self::text(text),
            other => {
                let text = serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string());
                Self {
                    content: vec![ToolContent::Text { text }],
                    structured_content: Some(other),
                    is_error: None,
                }
            }
        }
    }

    /// A tool-level failure the client sees as a successful call marked `isError`.
    pub fn error(err: &McpError) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: format!("Error: {}", err),
            }],
            structured_content: Some(serde_json::json!({
                "error": err.code_name(),
                "code": err.code(),
                "message": err.to_string(),
                "data": err.data(),
            })),
            is_error: Some(true),
        }
    }
}

/// Tool execution result content
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
}

/// MCP Initialize request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    #[serde(rename = "clientInfo", default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<ClientInfo>,
}

/// Client information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Client capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,
}

/// MCP Initialize response
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
}

impl ServerCapabilities {
    pub fn tools_only() -> Self {
        Self {
            tools: Some(ToolsCapability {
                list_changed: Some(false),
            }),
            experimental: None,
        }
    }
}

/// Tools capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged", default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Server information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}
