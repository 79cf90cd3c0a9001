//! Registry-Hub: multi-source enterprise registry aggregator
//!
//! This is the main entry point for the application.

use anyhow::Result;
use registry_hub::{
    cache::Cache,
    config,
    network::HttpClient,
    ratelimit::RateLimiter,
    sources::SourceLoader,
    web::{create_router, AppState},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            "-V" | "--version" => {
                println!("registry-hub {}", registry_hub::VERSION);
                return Ok(());
            }
            _ => {}
        }
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Starting Registry-Hub v{}", registry_hub::VERSION);

    // Load configuration
    let settings = config::load()?;
    info!(
        "Loaded configuration for instance: {}",
        settings.general.instance_name
    );

    // One limiter and one cache for the whole process
    let limiter = Arc::new(RateLimiter::new(settings.rate_limit.default.clone()));
    let cache = Arc::new(Cache::new(
        settings.cache.default_ttl(),
        settings.cache.max_capacity_bytes,
    ));

    let client = HttpClient::with_settings(&settings.outgoing)?;
    info!("HTTP client initialized");

    let registry = SourceLoader::load(&settings, limiter.clone(), cache.clone(), client)?;
    if registry.is_empty() {
        tracing::warn!("No source could be loaded; every call will report unknown sources");
    }

    let addr = SocketAddr::new(settings.server.bind_address.parse()?, settings.server.port);
    let state = AppState::new(settings, registry, limiter.clone(), cache);
    let app = create_router(state);

    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    limiter.shutdown();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// Print usage information
fn print_usage() {
    println!(
        r#"
Registry-Hub v{}
Multi-source enterprise registry aggregator

USAGE:
    registry-hub [OPTIONS]

OPTIONS:
    -h, --help             Print help information
    -V, --version          Print version information

ENVIRONMENT VARIABLES:
    REGISTRY_HUB_SETTINGS_PATH  Path to settings.yml
    REGISTRY_HUB_DEBUG          Enable debug mode (true/false)
    REGISTRY_HUB_PORT           Server port
    REGISTRY_HUB_BIND_ADDRESS   Bind address
    INSEE_CONSUMER_KEY          INSEE Sirene consumer key
    INSEE_CONSUMER_SECRET       INSEE Sirene consumer secret
    INPI_USERNAME               INPI RNE account
    INPI_PASSWORD               INPI RNE password
    RUST_LOG                    Log filter (default: info)
"#,
        registry_hub::VERSION
    );
}
