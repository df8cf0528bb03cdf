use serde::{Deserialize, Serialize};

pub const CATEGORY_DATABASE: &str = "database";
pub const CATEGORY_EXECUTION: &str = "execution";
pub const CATEGORY_WEB: &str = "web";
pub const CATEGORY_LOGGING: &str = "logging";

/// Enablement policy consulted when tools are discovered, plus the
/// elevated-privilege gate handed to sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPolicy {
    pub tools_enabled: bool,
    pub database: bool,
    pub execution: bool,
    pub web: bool,
    pub logging: bool,
    pub elevated_privileges: bool,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self {
            tools_enabled: true,
            database: true,
            execution: true,
            web: true,
            logging: true,
            elevated_privileges: false,
        }
    }
}

impl ToolPolicy {
    /// Categories without a dedicated switch are governed by the global flag only.
    pub fn category_allowed(&self, category: &str) -> bool {
        match category {
            CATEGORY_DATABASE => self.database,
            CATEGORY_EXECUTION => self.execution,
            CATEGORY_WEB => self.web,
            CATEGORY_LOGGING => self.logging,
            _ => true,
        }
    }

    pub fn allows(&self, category: &str, intrinsically_enabled: bool) -> bool {
        self.tools_enabled && self.category_allowed(category) && intrinsically_enabled
    }
}
