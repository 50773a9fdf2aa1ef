//! ==============================================================================
//! ingest_bridge.rs - mqtt ingest bridge entry point
//! ==============================================================================
//!
//! reads the configuration file once, subscribes to the sensor topic tree
//! and runs until ctrl-c. edits made through the config api take effect
//! on the next restart.
//!
//! ==============================================================================

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use iot_config_bridge::config::ServiceConfig;
use iot_config_bridge::ingest::{IngestBridge, RemoteSink, RestSink};
use iot_config_bridge::logging;
use iot_config_bridge::store::ConfigStore;

/// MQTT to CSV + remote store bridge.
#[derive(Parser, Debug)]
#[command(name = "ingest-bridge")]
#[command(version)]
struct Args {
    /// Service settings file (default: config/service.toml)
    #[arg(long, env = "SERVICE_CONFIG")]
    config: Option<PathBuf>,

    /// Configuration file path, overrides [store] path
    #[arg(long, env = "IOT_CONFIG_FILE")]
    store: Option<PathBuf>,

    /// Subscription pattern, overrides [bridge] topic
    #[arg(long)]
    topic: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = ServiceConfig::load_or_default(args.config.as_deref());
    if let Some(path) = args.store {
        settings.store.path = path;
    }
    if let Some(topic) = args.topic {
        settings.bridge.topic = topic;
    }
    logging::init(&settings.logging.level);
    settings.print_summary();

    let sink = RestSink::from_config(&settings.remote)
        .context("invalid [remote] settings")?
        .map(|sink| {
            tracing::info!(endpoint = %sink.endpoint(), "remote sink ready");
            Arc::new(sink) as Arc<dyn RemoteSink>
        });

    let store = ConfigStore::new(&settings.store.path);
    let bridge = IngestBridge::start(settings, &store, sink);

    bridge
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
}
