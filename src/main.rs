use std::sync::Arc;

use toolgate::api;
use toolgate::config::GatewayConfig;
use toolgate::gateway::Gateway;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = GatewayConfig::from_env();
    let port = config.http_port;
    let workers = config.queue.max_workers;

    let gateway = Arc::new(Gateway::new(config).await?);
    gateway.start().await;

    eprintln!("toolgate v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Workers: {}", workers);
    eprintln!("   Tools: {} registered", gateway.registry().count().await);
    eprintln!("   Health: http://0.0.0.0:{}/health", port);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!(port, "Health server started");
    axum::serve(listener, api::routes(Arc::clone(&gateway)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("Shutting down");
    gateway.stop().await;
    Ok(())
}
