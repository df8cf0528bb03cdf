use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use super::error::{ErrorKind, McpError};
use super::policy::ToolPolicy;
use super::protocol::Tool;

/// Context passed to tool handlers
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
    /// Whether the caller passed the elevated-privilege gate
    pub elevated: bool,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, elevated: bool) -> Self {
        Self {
            session_id: session_id.into(),
            elevated,
        }
    }
}

/// Contract every tool implementation satisfies.
///
/// `validate_parameters` is called on every invocation before the privilege
/// check and must be cheap and free of side effects. `execute` is the only
/// method allowed to do real work.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Policy grouping tag, e.g. "database", "execution", "web", "logging"
    fn category(&self) -> &str;

    /// JSON Schema for the accepted arguments
    fn parameter_schema(&self) -> Value;

    fn is_enabled(&self) -> bool {
        true
    }

    fn requires_elevated_privileges(&self) -> bool {
        false
    }

    fn validate_parameters(&self, _params: &Map<String, Value>) -> Result<(), McpError> {
        Ok(())
    }

    async fn execute(
        &self,
        params: Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, McpError>;

    fn usage_examples(&self) -> HashMap<String, Value> {
        HashMap::new()
    }

    /// Return the tool schema definition
    fn schema(&self) -> Tool {
        Tool {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameter_schema(),
        }
    }
}

/// Names are listed and looked up verbatim, so they must be non-empty and
/// carry no surrounding whitespace.
fn check_name(name: &str) -> Result<(), McpError> {
    if name.trim().is_empty() {
        return Err(McpError::InvalidArgument(
            "tool name must not be empty".to_string(),
        ));
    }
    if name.trim() != name {
        return Err(McpError::InvalidArgument(format!(
            "tool name '{}' has surrounding whitespace",
            name
        )));
    }
    Ok(())
}

#[derive(Default)]
struct Snapshot {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    skipped_by_policy: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RegistryStatistics {
    pub total: usize,
    pub by_category: BTreeMap<String, usize>,
    pub elevated: usize,
    pub skipped_by_policy: usize,
}

/// Tool registry managing all available MCP tools.
///
/// Readers take the current snapshot (one `Arc` clone under a short read lock)
/// and work on it without holding any lock. Writers copy the map, modify the
/// copy and swap it in.
#[derive(Default)]
pub struct ToolRegistry {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Register a tool handler. An existing tool with the same name is replaced.
    pub fn register(&self, handler: Arc<dyn ToolHandler>) -> Result<(), McpError> {
        check_name(handler.name())?;
        let name = handler.name().to_string();

        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut handlers = guard.handlers.clone();
        if handlers.insert(name.clone(), handler).is_some() {
            tracing::warn!(tool = %name, "Tool re-registered, previous definition replaced");
        }
        *guard = Arc::new(Snapshot {
            handlers,
            skipped_by_policy: guard.skipped_by_policy,
        });
        Ok(())
    }

    /// Rebuild the registry from a set of candidate tools, keeping only those the
    /// policy allows. Returns the number of registered tools.
    pub fn discover_and_register<I>(&self, candidates: I, policy: &ToolPolicy) -> usize
    where
        I: IntoIterator<Item = Arc<dyn ToolHandler>>,
    {
        let mut handlers: HashMap<String, Arc<dyn ToolHandler>> = HashMap::new();
        let mut skipped = 0usize;

        for candidate in candidates {
            if let Err(err) = check_name(candidate.name()) {
                tracing::error!(
                    category = candidate.category(),
                    error = %err,
                    "Skipping tool candidate with invalid name"
                );
                continue;
            }
            let name = candidate.name().to_string();
            if !policy.allows(candidate.category(), candidate.is_enabled()) {
                tracing::debug!(
                    tool = %name,
                    category = candidate.category(),
                    "Tool disabled by policy, not registered"
                );
                skipped += 1;
                continue;
            }
            if handlers.insert(name.clone(), candidate).is_some() {
                tracing::warn!(tool = %name, "Duplicate tool name during discovery, last one wins");
            }
        }

        let count = handlers.len();
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(Snapshot {
            handlers,
            skipped_by_policy: skipped,
        });

        tracing::info!(
            registered = count,
            skipped = skipped,
            "Tool discovery complete"
        );
        count
    }

    /// Get a tool handler by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.current().handlers.get(name).cloned()
    }

    /// Validate, authorize, then execute. The order is fixed so that a parameter
    /// error is never hidden behind a privilege error or the other way round.
    pub async fn execute(
        &self,
        name: &str,
        params: Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, McpError> {
        let handler = self
            .get(name)
            .ok_or_else(|| McpError::ToolNotFound(name.to_string()))?;

        handler.validate_parameters(&params)?;

        if handler.requires_elevated_privileges() && !context.elevated {
            return Err(McpError::PrivilegeRequired(name.to_string()));
        }

        // Validation errors raised from inside execute stay unwrapped so they are not retried.
        handler.execute(params, context).await.map_err(|err| match err {
            McpError::ToolExecution { .. } => err,
            err if err.kind() == ErrorKind::Validation => err,
            err => McpError::ToolExecution {
                tool: name.to_string(),
                source: Box::new(err),
            },
        })
    }

    /// List all available tools, sorted by name
    pub fn list_tools(&self) -> Vec<Tool> {
        let snapshot = self.current();
        let mut tools: Vec<Tool> = snapshot.handlers.values().map(|h| h.schema()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn list_by_category(&self, category: &str) -> Vec<Tool> {
        let snapshot = self.current();
        let mut tools: Vec<Tool> = snapshot
            .handlers
            .values()
            .filter(|h| h.category() == category)
            .map(|h| h.schema())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn usage_examples(&self, name: &str) -> Option<HashMap<String, Value>> {
        self.get(name).map(|h| h.usage_examples())
    }

    pub fn statistics(&self) -> RegistryStatistics {
        let snapshot = self.current();
        let mut by_category = BTreeMap::new();
        let mut elevated = 0;
        for handler in snapshot.handlers.values() {
            *by_category.entry(handler.category().to_string()).or_insert(0) += 1;
            if handler.requires_elevated_privileges() {
                elevated += 1;
            }
        }
        RegistryStatistics {
            total: snapshot.handlers.len(),
            by_category,
            elevated,
            skipped_by_policy: snapshot.skipped_by_policy,
        }
    }

    /// Check if a tool exists
    pub fn has_tool(&self, name: &str) -> bool {
        self.current().handlers.contains_key(name)
    }

    /// Get count of registered tools
    pub fn count(&self) -> usize {
        self.current().handlers.len()
    }
}
