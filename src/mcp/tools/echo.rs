use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::mcp::error::McpError;
use crate::mcp::policy::CATEGORY_EXECUTION;
use crate::mcp::registry::{ToolContext, ToolHandler};

/// Returns its `value` argument unchanged
pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the provided value back to the caller"
    }

    fn category(&self) -> &str {
        CATEGORY_EXECUTION
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "value": {
                    "description": "Any JSON value to echo back"
                }
            },
            "required": ["value"]
        })
    }

    fn validate_parameters(&self, params: &Map<String, Value>) -> Result<(), McpError> {
        if params.contains_key("value") {
            Ok(())
        } else {
            Err(McpError::InvalidParameters(
                "missing required parameter 'value'".to_string(),
            ))
        }
    }

    async fn execute(
        &self,
        mut params: Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, McpError> {
        tracing::debug!(session_id = %context.session_id, "Echo tool invoked");
        Ok(params.remove("value").unwrap_or(Value::Null))
    }

    fn usage_examples(&self) -> std::collections::HashMap<String, Value> {
        let mut examples = std::collections::HashMap::new();
        examples.insert("text".to_string(), json!({ "value": "hi" }));
        examples.insert("object".to_string(), json!({ "value": { "a": 1 } }));
        examples
    }
}
