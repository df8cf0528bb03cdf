pub mod dispatcher;
pub mod error;
#[cfg(test)]
mod mock;
pub mod policy;
pub mod protocol;
pub mod registry;
pub mod resilience;
pub mod session;
pub mod tools;
pub mod websocket;

pub use dispatcher::{Dispatcher, READY_NOTIFICATION};
pub use error::{ErrorKind, McpError};
pub use policy::ToolPolicy;
pub use protocol::*;
pub use registry::{RegistryStatistics, ToolContext, ToolHandler, ToolRegistry};
pub use resilience::{ErrorStatistics, ErrorTracker, ResilienceConfig, ResilienceLayer};
pub use session::{McpSession, SessionInbox, SessionManager, SessionState, SessionStatistics};
pub use websocket::mcp_websocket;
