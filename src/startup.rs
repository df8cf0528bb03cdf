use crate::configuration::Settings;
use crate::health::HealthChecker;
use crate::mcp::{self, Dispatcher, ResilienceLayer, SessionManager, ToolPolicy, ToolRegistry};
use crate::routes;
use actix_web::{dev::Server, web, App, HttpServer};
use std::future::Future;
use std::net::TcpListener;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_actix_web::TracingLogger;

/// Wire the MCP core and start the HTTP server. Cancelling `shutdown` aborts
/// pending retry waits.
pub async fn run(
    listener: TcpListener,
    settings: Settings,
    shutdown: CancellationToken,
) -> Result<Server, std::io::Error> {
    let policy = ToolPolicy::from(&settings.tools);
    let resilience = Arc::new(ResilienceLayer::with_shutdown(
        (&settings.resilience).into(),
        shutdown,
    ));

    // Initialize MCP tool registry
    let registry = Arc::new(ToolRegistry::new());
    let registered =
        registry.discover_and_register(mcp::tools::builtin_tools(resilience.clone()), &policy);
    tracing::info!(registered, "MCP tools registered");

    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        resilience.clone(),
        settings.server.server_info(),
        settings.server.protocol_version.clone(),
    ));
    let sessions = Arc::new(SessionManager::with_inbound_capacity(
        dispatcher,
        settings.server.session_queue_capacity,
    ));

    let health_checker = Arc::new(HealthChecker::new(
        resilience.clone(),
        registry,
        sessions.clone(),
    ));

    let health_checker = web::Data::new(health_checker);
    let resilience = web::Data::new(resilience);
    let sessions = web::Data::new(sessions);
    let settings = web::Data::new(settings);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .service(
                web::scope("/health_check")
                    .service(routes::health_check)
                    .service(routes::error_statistics),
            )
            .service(web::resource("/mcp").route(web::get().to(mcp::mcp_websocket)))
            .app_data(health_checker.clone())
            .app_data(resilience.clone())
            .app_data(sessions.clone())
            .app_data(settings.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}

/// Once `signal` resolves, cancel `shutdown` and stop the server gracefully.
/// Pending retry waits are released before open connections are drained.
pub fn stop_on_signal<S>(server: &Server, signal: S, shutdown: CancellationToken)
where
    S: Future<Output = ()> + Send + 'static,
{
    let handle = server.handle();
    tokio::spawn(async move {
        signal.await;
        tracing::info!("Shutdown signal received, cancelling pending retries");
        shutdown.cancel();
        handle.stop(true).await;
    });
}
