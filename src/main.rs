use anyhow::Context;
use std::net::TcpListener;
use tokio_util::sync::CancellationToken;
use toolgate::configuration::get_configuration;
use toolgate::startup::{run, stop_on_signal};
use toolgate::telemetry::{get_subscriber, init_subscriber};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = get_subscriber("toolgate".into(), "info".into(), std::io::stdout);
    init_subscriber(subscriber)?;

    let settings = get_configuration().context("Failed to read configuration")?;

    let address = format!("{}:{}", settings.app_host, settings.app_port);
    tracing::info!("Start server at {:?}", &address);
    let listener =
        TcpListener::bind(&address).with_context(|| format!("failed to bind to {}", address))?;

    let shutdown = CancellationToken::new();
    let server = run(listener, settings, shutdown.clone()).await?;
    stop_on_signal(
        &server,
        async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        },
        shutdown.clone(),
    );
    let result = server.await;

    // The server can also stop without a signal
    shutdown.cancel();
    result.context("Server terminated with an error")
}
