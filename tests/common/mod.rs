use std::net::TcpListener;
use tokio_util::sync::CancellationToken;
use toolgate::configuration::Settings;

pub struct TestApp {
    pub address: String,
    pub ws_address: String,
    pub shutdown: CancellationToken,
}

pub async fn spawn_app_with_configuration(configuration: Settings) -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    let shutdown = CancellationToken::new();
    let server = toolgate::startup::run(listener, configuration, shutdown.clone())
        .await
        .expect("Failed to bind address.");

    let _ = tokio::spawn(server);
    println!("Used Port: {}", port);

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        ws_address: format!("ws://127.0.0.1:{}/mcp", port),
        shutdown,
    }
}

/// Default settings with retry delays short enough for tests
pub async fn spawn_app() -> TestApp {
    let mut configuration = Settings::default();
    configuration.resilience.base_delay_ms = 5;
    configuration.resilience.max_delay_ms = 20;
    spawn_app_with_configuration(configuration).await
}
