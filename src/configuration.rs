use crate::mcp::resilience::{
    DEFAULT_BASE_DELAY, DEFAULT_ERROR_THRESHOLD, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY,
    DEFAULT_RESET_WINDOW,
};
use crate::mcp::session::DEFAULT_INBOUND_CAPACITY;
use crate::mcp::{ResilienceConfig, ServerInfo, ToolPolicy};
use serde;
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app_host: String,
    pub app_port: u16,
    pub server: ServerSettings,
    pub tools: ToolSettings,
    pub resilience: ResilienceSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_host: "127.0.0.1".to_string(),
            app_port: 8000,
            server: ServerSettings::default(),
            tools: ToolSettings::default(),
            resilience: ResilienceSettings::default(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub name: String,
    pub protocol_version: String,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
    /// Payloads one session may queue before requests get TEMPORARILY_UNAVAILABLE
    pub session_queue_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            name: "toolgate".to_string(),
            protocol_version: "2024-11-05".to_string(),
            heartbeat_interval_secs: 5,
            client_timeout_secs: 10,
            session_queue_capacity: DEFAULT_INBOUND_CAPACITY,
        }
    }
}

impl ServerSettings {
    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            name: self.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Tool enablement switches, one per category
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub enabled: bool,
    pub database: bool,
    pub execution: bool,
    pub web: bool,
    pub logging: bool,
    pub elevated_privileges: bool,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            database: true,
            execution: true,
            web: true,
            logging: true,
            elevated_privileges: false,
        }
    }
}

impl From<&ToolSettings> for ToolPolicy {
    fn from(tools: &ToolSettings) -> Self {
        ToolPolicy {
            tools_enabled: tools.enabled,
            database: tools.database,
            execution: tools.execution,
            web: tools.web,
            logging: tools.logging,
            elevated_privileges: tools.elevated_privileges,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub error_threshold: u64,
    pub reset_window_secs: u64,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY.as_millis() as u64,
            max_delay_ms: DEFAULT_MAX_DELAY.as_millis() as u64,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            reset_window_secs: DEFAULT_RESET_WINDOW.as_secs(),
        }
    }
}

impl From<&ResilienceSettings> for ResilienceConfig {
    fn from(settings: &ResilienceSettings) -> Self {
        ResilienceConfig {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            error_threshold: settings.error_threshold,
            reset_window: Duration::from_secs(settings.reset_window_secs),
        }
    }
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Defaults come from `Settings::default()`; the file is optional and
    // TOOLGATE__SECTION__KEY variables override both
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("TOOLGATE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    settings.try_deserialize()
}
