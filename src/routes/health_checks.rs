use crate::health::HealthChecker;
use crate::mcp::ResilienceLayer;
use actix_web::{get, web, Error, HttpResponse, Responder};
use std::sync::Arc;

/// Full health report; 503 when any component is unhealthy
#[tracing::instrument(name = "Health check", skip(checker))]
#[get("")]
pub async fn health_check(
    checker: web::Data<Arc<HealthChecker>>,
) -> Result<impl Responder, Error> {
    let report = checker.check_all().await;
    let mut response = if report.is_unhealthy() {
        tracing::warn!(status = ?report.status, "Health check reports unhealthy components");
        HttpResponse::ServiceUnavailable()
    } else {
        HttpResponse::Ok()
    };
    Ok(response.json(report))
}

#[tracing::instrument(name = "Error statistics", skip(resilience))]
#[get("/errors")]
pub async fn error_statistics(
    resilience: web::Data<Arc<ResilienceLayer>>,
) -> Result<impl Responder, Error> {
    Ok(HttpResponse::Ok().json(resilience.error_statistics()))
}
