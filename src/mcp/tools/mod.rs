//! Built-in tools shipped with the server.

mod component_health;
mod echo;

pub use component_health::ComponentHealthTool;
pub use echo::EchoTool;

use std::sync::Arc;

use crate::mcp::registry::ToolHandler;
use crate::mcp::resilience::ResilienceLayer;

/// Candidate set handed to `ToolRegistry::discover_and_register`
pub fn builtin_tools(resilience: Arc<ResilienceLayer>) -> Vec<Arc<dyn ToolHandler>> {
    let echo: Arc<dyn ToolHandler> = Arc::new(EchoTool);
    let component_health: Arc<dyn ToolHandler> = Arc::new(ComponentHealthTool::new(resilience));
    vec![echo, component_health]
}
