//! ==============================================================================
//! config_api.rs - configuration api entry point
//! ==============================================================================
//!
//! serves the device/broker configuration over http. stateless apart from
//! the store handle; every request reads or rewrites the json file.
//!
//! ==============================================================================

use anyhow::{Context, Result};
use axum::http::Request;
use clap::Parser;
use std::path::PathBuf;
use tower_http::trace::TraceLayer;
use tracing::Level;

use iot_config_bridge::api::{router, AppState};
use iot_config_bridge::config::ServiceConfig;
use iot_config_bridge::logging;
use iot_config_bridge::store::ConfigStore;

/// HTTP api for the shared device configuration file.
#[derive(Parser, Debug)]
#[command(name = "config-api")]
#[command(version)]
struct Args {
    /// Service settings file (default: config/service.toml)
    #[arg(long, env = "SERVICE_CONFIG")]
    config: Option<PathBuf>,

    /// Configuration file path, overrides [store] path
    #[arg(long, env = "IOT_CONFIG_FILE")]
    store: Option<PathBuf>,

    /// Listen address, overrides [api] bind_addr
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // step 1: settings, then logging at the configured level
    let mut settings = ServiceConfig::load_or_default(args.config.as_deref());
    if let Some(path) = args.store {
        settings.store.path = path;
    }
    if let Some(bind) = args.bind {
        settings.api.bind_addr = bind;
    }
    logging::init(&settings.logging.level);
    settings.print_summary();

    // step 2: make sure the configuration file exists
    let store = ConfigStore::new(&settings.store.path);
    store
        .ensure_initialized()
        .with_context(|| format!("failed to create {}", settings.store.path.display()))?;

    // step 3: serve
    let app = router(AppState::new(store)).layer(TraceLayer::new_for_http().make_span_with(
        |request: &Request<_>| {
            tracing::span!(
                Level::INFO,
                "http_request",
                method = %request.method(),
                path = %request.uri().path(),
            )
        },
    ));

    let listener = tokio::net::TcpListener::bind(&settings.api.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.api.bind_addr))?;
    tracing::info!(addr = %settings.api.bind_addr, "config api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
