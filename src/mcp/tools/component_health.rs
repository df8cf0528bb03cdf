use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::mcp::error::McpError;
use crate::mcp::policy::CATEGORY_LOGGING;
use crate::mcp::registry::{ToolContext, ToolHandler};
use crate::mcp::resilience::ResilienceLayer;

/// Reports component health and the error tracker contents.
/// Only available to elevated sessions.
pub struct ComponentHealthTool {
    resilience: Arc<ResilienceLayer>,
}

impl ComponentHealthTool {
    pub fn new(resilience: Arc<ResilienceLayer>) -> Self {
        Self { resilience }
    }
}

#[async_trait]
impl ToolHandler for ComponentHealthTool {
    fn name(&self) -> &str {
        "component_health"
    }

    fn description(&self) -> &str {
        "Report per-component health and recent error statistics"
    }

    fn category(&self) -> &str {
        CATEGORY_LOGGING
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "component": {
                    "type": "string",
                    "description": "Restrict the report to one component (tools, search, documentation, embeddings)"
                }
            }
        })
    }

    fn requires_elevated_privileges(&self) -> bool {
        true
    }

    fn validate_parameters(&self, params: &Map<String, Value>) -> Result<(), McpError> {
        match params.get("component") {
            None | Some(Value::String(_)) => Ok(()),
            Some(_) => Err(McpError::InvalidParameters(
                "'component' must be a string".to_string(),
            )),
        }
    }

    async fn execute(
        &self,
        params: Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, McpError> {
        let mut health = self.resilience.component_health();
        if let Some(component) = params.get("component").and_then(Value::as_str) {
            health.retain(|name, _| name == component);
            if health.is_empty() {
                return Err(McpError::InvalidParameters(format!(
                    "unknown component '{}'",
                    component
                )));
            }
        }

        tracing::info!(session_id = %context.session_id, "Component health requested via MCP");

        Ok(json!({
            "components": health,
            "errors": self.resilience.error_statistics(),
        }))
    }
}
