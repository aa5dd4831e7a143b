use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use vehicle_dispatch::api;
use vehicle_dispatch::config::Config;
use vehicle_dispatch::error::AppError;
use vehicle_dispatch::service::memory::InMemoryBackend;
use vehicle_dispatch::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let backend = Arc::new(InMemoryBackend::new(config.event_buffer_size));
    if config.seed_demo_data {
        backend.seed_demo()?;
    }

    let shared_state = Arc::new(AppState::new(backend, &config));
    let app = api::rest::router(shared_state.clone());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
