use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::mcp::SessionStatistics;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub message: Option<String>,
    pub last_checked: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, serde_json::Value>>,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            last_checked: Utc::now(),
            details: None,
        }
    }

    pub fn unhealthy(error: String) -> Self {
        Self {
            status: ComponentStatus::Unhealthy,
            message: Some(error),
            last_checked: Utc::now(),
            details: None,
        }
    }

    pub fn degraded(message: String) -> Self {
        Self {
            status: ComponentStatus::Degraded,
            message: Some(message),
            last_checked: Utc::now(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: HashMap<String, serde_json::Value>) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResponse {
    pub status: ComponentStatus,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub uptime_seconds: u64,
    pub tool_count: usize,
    pub sessions: SessionStatistics,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthCheckResponse {
    pub fn new(
        version: String,
        uptime_seconds: u64,
        tool_count: usize,
        sessions: SessionStatistics,
    ) -> Self {
        Self {
            status: ComponentStatus::Healthy,
            timestamp: Utc::now(),
            version,
            uptime_seconds,
            tool_count,
            sessions,
            components: BTreeMap::new(),
        }
    }

    pub fn add_component(&mut self, name: String, health: ComponentHealth) {
        if health.status == ComponentStatus::Unhealthy {
            self.status = ComponentStatus::Unhealthy;
        } else if health.status == ComponentStatus::Degraded
            && self.status != ComponentStatus::Unhealthy
        {
            self.status = ComponentStatus::Degraded;
        }
        self.components.insert(name, health);
    }

    pub fn is_healthy(&self) -> bool {
        self.status == ComponentStatus::Healthy
    }

    pub fn is_unhealthy(&self) -> bool {
        self.status == ComponentStatus::Unhealthy
    }
}
