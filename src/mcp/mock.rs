use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::error::McpError;
use super::registry::{ToolContext, ToolHandler};

/// Configurable tool used by the unit tests. Echoes `value` back, or the whole
/// argument map when `value` is absent.
pub struct MockTool {
    name: String,
    category: String,
    enabled: bool,
    elevated: bool,
    required: Option<String>,
    delay: Option<Duration>,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl MockTool {
    pub fn new(name: &str, category: &str) -> Self {
        Self {
            name: name.to_string(),
            category: category.to_string(),
            enabled: true,
            elevated: false,
            required: None,
            delay: None,
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn elevated(mut self) -> Self {
        self.elevated = true;
        self
    }

    pub fn requiring(mut self, field: &str) -> Self {
        self.required = Some(field.to_string());
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail with a transient error on the first `times` executions
    pub fn failing_times(self, times: usize) -> Self {
        self.failures_left.store(times, Ordering::SeqCst);
        self
    }

    pub fn always_failing(self) -> Self {
        self.failing_times(usize::MAX)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolHandler for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Mock tool for tests"
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "value": { "type": "string" } }
        })
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn requires_elevated_privileges(&self) -> bool {
        self.elevated
    }

    fn validate_parameters(&self, params: &Map<String, Value>) -> Result<(), McpError> {
        match &self.required {
            Some(field) if !params.contains_key(field) => Err(McpError::InvalidParameters(
                format!("missing required parameter '{}'", field),
            )),
            _ => Ok(()),
        }
    }

    async fn execute(
        &self,
        params: Map<String, Value>,
        _context: &ToolContext,
    ) -> Result<Value, McpError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                if left == 0 {
                    None
                } else if left == usize::MAX {
                    Some(left)
                } else {
                    Some(left - 1)
                }
            })
            .is_ok();
        if failing {
            return Err(McpError::Transient("simulated failure".to_string()));
        }

        Ok(params
            .get("value")
            .cloned()
            .unwrap_or(Value::Object(params)))
    }
}
