use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

use isk_server::catalog::Catalog;
use isk_server::config::{Cli, Commands, ServerConfig};
use isk_server::registry::DisplayRegistry;
use isk_server::routes::build_router;
use isk_server::store::{DisplayStore, MemoryStore, RedisStore};
use isk_server::telemetry::{self, Telemetry};
use isk_server::{remote, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    if let Some(Commands::Remote { url, command }) = cli.command.take() {
        telemetry::init_client_logging()?;
        let reply = remote::run(&url, command).await?;
        println!("{}", serde_json::to_string_pretty(&reply)?);
        if reply.is_failure() {
            std::process::exit(1);
        }
        return Ok(());
    }

    let telemetry = Telemetry::init()?;
    let config = ServerConfig::try_from(cli)?;
    info!(
        listen_addr = %config.listen_addr,
        redis = config.redis_url.is_some(),
        tokens = config.tokens.len(),
        "starting isk-server"
    );

    run(config, telemetry).await
}

async fn run(config: ServerConfig, telemetry: Telemetry) -> Result<()> {
    let store: Arc<dyn DisplayStore> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisStore::new(url)
                .await
                .context("failed to connect to redis")?,
        ),
        None => Arc::new(MemoryStore::new()),
    };
    let registry = DisplayRegistry::load(store)
        .await
        .context("failed to load displays")?;

    let catalog = Catalog::new();
    catalog.create_event(&config.event_name);

    let state = AppState::new(registry, catalog, config.channel_depth, config.tokens.clone())
        .with_metrics(telemetry.metrics_handle());
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!("isk-server listening on {}", config.listen_addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server shutdown with error")?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
