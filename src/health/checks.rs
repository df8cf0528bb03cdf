use super::models::HealthCheckResponse;
use crate::mcp::{ResilienceLayer, SessionManager, ToolRegistry};
use std::sync::Arc;
use std::time::Instant;

/// Builds the health report from the resilience tracker and live session state
pub struct HealthChecker {
    resilience: Arc<ResilienceLayer>,
    registry: Arc<ToolRegistry>,
    sessions: Arc<SessionManager>,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(
        resilience: Arc<ResilienceLayer>,
        registry: Arc<ToolRegistry>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            resilience,
            registry,
            sessions,
            start_time: Instant::now(),
        }
    }

    #[tracing::instrument(name = "Check component health", skip(self))]
    pub async fn check_all(&self) -> HealthCheckResponse {
        let version = env!("CARGO_PKG_VERSION").to_string();
        let uptime = self.start_time.elapsed().as_secs();
        let mut response = HealthCheckResponse::new(
            version,
            uptime,
            self.registry.count(),
            self.sessions.statistics().await,
        );

        for (name, health) in self.resilience.component_health() {
            response.add_component(name, health);
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ComponentStatus;
    use crate::mcp::{Dispatcher, ResilienceConfig, ServerInfo};

    fn checker() -> (HealthChecker, Arc<ResilienceLayer>) {
        let registry = Arc::new(ToolRegistry::new());
        let resilience = Arc::new(ResilienceLayer::new(ResilienceConfig::default()));
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            resilience.clone(),
            ServerInfo {
                name: "toolgate".to_string(),
                version: "0.1.0".to_string(),
            },
            "2024-11-05".to_string(),
        ));
        let sessions = Arc::new(SessionManager::new(dispatcher));
        (
            HealthChecker::new(resilience.clone(), registry, sessions),
            resilience,
        )
    }

    #[tokio::test]
    async fn test_fresh_server_is_healthy() {
        let (checker, _) = checker();
        let report = checker.check_all().await;
        assert!(report.is_healthy());
        assert_eq!(report.components.len(), 4);
        assert_eq!(report.sessions.active, 0);
    }

    #[tokio::test]
    async fn test_recent_errors_degrade_report() {
        let (checker, resilience) = checker();
        resilience.tracker().record_failure("docs:render");
        let report = checker.check_all().await;
        assert_eq!(report.status, ComponentStatus::Degraded);
        assert_eq!(
            report.components["documentation"].status,
            ComponentStatus::Degraded
        );
    }
}
