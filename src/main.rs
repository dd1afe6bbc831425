use std::sync::Arc;

use anyhow::Context;
use relay_llm::{HttpDispatcher, ProviderConfig};
use relay_server::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting relay server");

    let provider = ProviderConfig::from_env();
    tracing::info!(
        provider = %provider.kind,
        model = %provider.model,
        "Provider selected"
    );

    let dispatcher = Arc::new(HttpDispatcher::new(provider));

    let config = ServerConfig::from_env();
    let bind_addr = config.bind_addr();
    let handle = relay_server::start(config, dispatcher)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!(port = handle.port(), "Relay server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("Shutting down");
    handle.stopped().await;

    Ok(())
}
