use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::Instrument;

use super::error::McpError;
use super::protocol::{
    CallToolRequest, CallToolResponse, ErrorObject, InitializeParams, InitializeResult, Message,
    Notification, Request, Response, ServerCapabilities, ServerInfo, ToolListResponse,
};
use super::registry::ToolRegistry;
use super::resilience::ResilienceLayer;
use super::session::McpSession;

pub const READY_NOTIFICATION: &str = "notifications/server/ready";

/// Routes parsed messages to the built-in protocol methods and to the tool registry.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    resilience: Arc<ResilienceLayer>,
    server_info: ServerInfo,
    protocol_version: String,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        resilience: Arc<ResilienceLayer>,
        server_info: ServerInfo,
        protocol_version: String,
    ) -> Self {
        Self {
            registry,
            resilience,
            server_info,
            protocol_version,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn resilience(&self) -> &Arc<ResilienceLayer> {
        &self.resilience
    }

    /// Handle one raw payload. A malformed payload yields a parse-error response
    /// with a null id; it never ends the session.
    pub async fn handle_text(&self, session: &McpSession, text: &str) -> Option<Message> {
        match Message::parse(text) {
            Ok(message) => self.handle_message(session, message).await,
            Err(err) => {
                tracing::error!(session_id = %session.id, error = %err, "[MCP] Failed to parse payload");
                Some(Response::error(Value::Null, ErrorObject::parse_error(&err.to_string())).into())
            }
        }
    }

    /// Requests get exactly one response; notifications and client responses get none.
    pub async fn handle_message(&self, session: &McpSession, message: Message) -> Option<Message> {
        match message {
            Message::Request(req) => Some(self.handle_request(session, req).await.into()),
            Message::Notification(note) => {
                self.handle_notification(session, note);
                None
            }
            Message::Response(resp) => {
                tracing::debug!(session_id = %session.id, id = %resp.id, "Ignoring response sent by client");
                None
            }
        }
    }

    async fn handle_request(&self, session: &McpSession, req: Request) -> Response {
        tracing::debug!(session_id = %session.id, id = %req.id, method = %req.method, "[MCP] Request");

        let result = match req.method.as_str() {
            "initialize" => self.handle_initialize(session, req.params),
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(session, req.params).await,
            "ping" => Ok(json!({})),
            other => Err(McpError::MethodNotFound(other.to_string())),
        };

        match result {
            Ok(value) => Response::success(req.id, value),
            Err(err) => {
                tracing::warn!(session_id = %session.id, method = %req.method, error = %err, "Request failed");
                Response::error(req.id, err.to_error_object())
            }
        }
    }

    fn handle_notification(&self, session: &McpSession, note: Notification) {
        match note.method.as_str() {
            "notifications/initialized" => {
                session.set_initialized(true);
                tracing::info!(session_id = %session.id, "MCP client initialized");
            }
            "notifications/cancelled" => {
                tracing::debug!(session_id = %session.id, "Cancellation requested, in-flight calls run to completion");
            }
            other => {
                tracing::warn!(session_id = %session.id, method = %other, "Ignoring unknown notification");
            }
        }
    }

    /// Handle MCP initialize method
    fn handle_initialize(
        &self,
        session: &McpSession,
        params: Map<String, Value>,
    ) -> Result<Value, McpError> {
        if !params.is_empty() {
            let params: InitializeParams = serde_json::from_value(Value::Object(params))
                .map_err(|e| McpError::InvalidParams(e.to_string()))?;
            let client = params
                .client_info
                .as_ref()
                .map(|c| c.name.as_str())
                .unwrap_or("unknown");

            tracing::info!(
                session_id = %session.id,
                protocol_version = %params.protocol_version,
                client = %client,
                "MCP client initializing"
            );
            if let Some(info) = &params.client_info {
                session.set_context("client_info".to_string(), serde_json::to_value(info)?);
            }
        }

        let result = InitializeResult {
            protocol_version: self.protocol_version.clone(),
            capabilities: ServerCapabilities::tools_only(),
            server_info: self.server_info.clone(),
        };
        Ok(serde_json::to_value(result)?)
    }

    /// Handle tools/list method
    fn handle_tools_list(&self) -> Result<Value, McpError> {
        let tools = self.registry.list_tools();
        tracing::debug!("Listing {} available tools", tools.len());
        Ok(serde_json::to_value(ToolListResponse { tools })?)
    }

    /// Handle tools/call method. Tool-level failures come back as a successful
    /// result marked `isError`; only systemic failures use the error channel.
    async fn handle_tools_call(
        &self,
        session: &McpSession,
        params: Map<String, Value>,
    ) -> Result<Value, McpError> {
        let call: CallToolRequest = serde_json::from_value(Value::Object(params))
            .map_err(|e| McpError::InvalidParams(e.to_string()))?;

        let tool_span = tracing::info_span!(
            "mcp_tool_call",
            tool = %call.name,
            session_id = %session.id
        );

        // Unknown names never reach the tracker, so clients cannot mint keys
        if !self.registry.has_tool(&call.name) {
            let err = McpError::ToolNotFound(call.name.clone());
            tool_span.in_scope(|| tracing::warn!(error = %err, "Tool call failed"));
            return Ok(serde_json::to_value(CallToolResponse::error(&err))?);
        }

        let arguments = call.arguments.unwrap_or_default();
        let context = session.tool_context();
        let key = format!("tool:{}", call.name);

        let outcome = self
            .resilience
            .run(&key, || {
                self.registry
                    .execute(&call.name, arguments.clone(), &context)
            })
            .instrument(tool_span.clone())
            .await;

        let _enter = tool_span.enter();
        let response = match outcome {
            Ok(value) => {
                tracing::info!("Tool executed successfully");
                CallToolResponse::from_value(value)
            }
            Err(err) if err.is_tool_level() => {
                tracing::warn!(error = %err, "Tool call failed");
                CallToolResponse::error(&err)
            }
            Err(err) => {
                tracing::error!(error = %err, "Tool call rejected");
                return Err(err);
            }
        };

        Ok(serde_json::to_value(response)?)
    }

    /// Notification pushed when a session opens
    pub fn ready_notification(&self, session: &McpSession) -> Message {
        let mut params = Map::new();
        params.insert(
            "serverInfo".to_string(),
            json!({ "name": self.server_info.name, "version": self.server_info.version }),
        );
        params.insert(
            "protocolVersion".to_string(),
            Value::String(self.protocol_version.clone()),
        );
        params.insert(
            "capabilities".to_string(),
            json!({ "tools": { "listChanged": false } }),
        );
        params.insert("toolCount".to_string(), json!(self.registry.count()));
        params.insert("sessionId".to_string(), Value::String(session.id.clone()));
        Notification::new(READY_NOTIFICATION, params).into()
    }
}
