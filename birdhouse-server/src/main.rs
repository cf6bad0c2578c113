use anyhow::{anyhow, Context, Result};
use birdhouse::telemetry::{EventEmitter, LogSink, MulticastSink};
use birdhouse::{SandboxClient, SocialClient};
use birdhouse_jsonl::JsonlSink;
use birdhouse_server::{logging, router, AppState, GatewayConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::load().context("failed to load configuration")?;
    logging::init(config.logging.format, &config.logging.level).map_err(|e| anyhow!(e))?;

    let events = match &config.telemetry.jsonl_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "writing telemetry as JSON lines");
            EventEmitter::new(MulticastSink::new(LogSink, JsonlSink::new(path)))
        }
        None => EventEmitter::new(LogSink),
    };

    let client: Arc<dyn SocialClient> = Arc::new(SandboxClient::new(config.session_store()));
    let state = AppState::from_config(&config, client, events)?;

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(
        addr = %listener.local_addr()?,
        requests_per_minute = config.rate_limit.requests_per_minute,
        requests_per_hour = config.rate_limit.requests_per_hour,
        "gateway listening"
    );

    axum::serve(listener, router(state)).with_graceful_shutdown(shutdown_signal()).await?;
    tracing::info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
