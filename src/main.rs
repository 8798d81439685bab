use std::sync::Arc;

use clap::Parser;
use driftwood::cache::CacheClient;
use driftwood::config::{Cli, ResolverConfig};
use driftwood::local_zone::LocalZone;
use driftwood::server::{Server, shutdown_signal};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match ResolverConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            // Configuration errors are fatal and happen before any logging
            // filter is installed, so this goes straight to stderr.
            eprintln!("fatal: invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    config.apply_cli(&cli);

    init_tracing(config.production);

    tracing::info!(
        "starting driftwood on {} with {} upstream(s)",
        config.bind_addr,
        config.upstream_servers.len()
    );

    let config = Arc::new(config);
    let cache = Arc::new(CacheClient::connect(&config.redis_url()).await);
    let local_zone = Arc::new(LocalZone::new(config.local_zone.clone()));

    let server = match Server::bind(Arc::clone(&config), cache, local_zone).await {
        Ok(server) => server,
        Err(e) => {
            error!("failed to bind {}: {}", config.bind_addr, e);
            std::process::exit(1);
        }
    };

    let shutdown_rx = shutdown_signal();
    server.run(shutdown_rx).await;
}

fn init_tracing(production: bool) {
    let default_level = if production { "info" } else { "debug" };
    let filter = std::env::var("RUST_LOG")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| default_level.to_string());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();
}
