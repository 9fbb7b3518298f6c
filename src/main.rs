//! skiff - Endpoint registry server
//!
//! Serves the example Endpoint registry over the framed binary protocol.

use skiff::{processor, InMemoryRegistry};
use skiff_server::{Config, Server, ServerConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if SKIFF_CONFIG is set, then env overrides)
    let config_path = std::env::var("SKIFF_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(path) = &config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting skiff server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Max frame size: {} bytes", config.protocol.max_frame_size);
    tracing::info!(
        "  Strict read/write: {}/{}",
        config.protocol.strict_read,
        config.protocol.strict_write
    );
    tracing::info!("  Max in-flight per connection: {}", config.dispatch.max_in_flight);

    let registry = Arc::new(InMemoryRegistry::new());
    let processor = processor(registry.clone(), config.protocol.codec_options());
    let server = Arc::new(Server::new(ServerConfig::from(&config), processor));

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    for (method, stats) in server.processor().stats().snapshot() {
        tracing::info!(
            "  {}: {} requests, {} ok, {} failed",
            method,
            stats.requests,
            stats.successes,
            stats.failures
        );
    }
    tracing::info!("Server stopped ({} endpoints registered)", registry.len());
    Ok(())
}
