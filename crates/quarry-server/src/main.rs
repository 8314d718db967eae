use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use quarry_client::{ClientConfig, build_orchestrator};
use quarry_core::{BatchCoordinator, ServiceConfig};
use quarry_server::routes;
use quarry_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("quarry=info".parse()?))
        .with_target(false)
        .init();

    let api_key = std::env::var("QUARRY_SERVER_API_KEY")
        .context("QUARRY_SERVER_API_KEY must be set")?;
    let port = std::env::var("QUARRY_SERVER_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");
    let per_second = env_u64("QUARRY_SERVER_RPS", 10)?;
    let burst = env_u64("QUARRY_SERVER_BURST", 20)?;

    let service = ServiceConfig::from_env().context("Invalid QUARRY_* configuration")?;
    let client = ClientConfig {
        fetch_timeout: service.request_timeout,
        allow_private_urls: false,
        enable_browser: true,
    };
    let orchestrator = Arc::new(build_orchestrator(&service, &client).await?);
    let batch = BatchCoordinator::from_config(orchestrator, &service)?;

    let state = Arc::new(AppState::new(batch, api_key));
    let shutdown = state.shutdown.clone();

    let governor = GovernorConfigBuilder::default()
        .per_second(per_second)
        .burst_size(u32::try_from(burst).context("QUARRY_SERVER_BURST is too large")?)
        .finish()
        .context("QUARRY_SERVER_RPS and QUARRY_SERVER_BURST must be positive")?;

    let app = routes::router(state)
        .layer(GovernorLayer::new(Arc::new(governor)))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown))
    .await?;

    Ok(())
}

fn env_u64(name: &str, default: u64) -> anyhow::Result<u64> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a non-negative integer, got {raw:?}")),
        Err(_) => Ok(default),
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for CTRL+C; shutting down");
    }
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}
