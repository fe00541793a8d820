use clap::Parser;
use edgeward::config::Config;
use edgeward::logging;
use edgeward::proxy_service::ProxyService;
use edgeward::server;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    logging::init(config.log_format);

    // Only ring is compiled in; installing it up front keeps rustls from
    // having to pick a provider lazily.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let routing = config.routing().map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;
    info!(
        upstream = %config.upstream,
        endpoint = %routing.endpoint,
        async_keywords = routing.async_keywords.len(),
        sync_keywords = routing.sync_keywords.len(),
        block_threshold = routing.block_threshold,
        "configuration loaded"
    );

    let service = ProxyService::new(config.proxy_settings(), routing)?;

    let listener = TcpListener::bind(config.listen).await.map_err(|e| {
        error!("Failed to bind to {}: {}", config.listen, e);
        e
    })?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    server::serve(listener, service, shutdown).await;
    Ok(())
}
