//! ==============================================================================
//! config.rs - Service Settings Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `service.toml`.
//!     loads settings from file or falls back to defaults.
//!
//! structure:
//!     - ApiConfig: where the configuration api listens.
//!     - StoreConfig: where the shared json configuration file lives.
//!     - BridgeConfig: mqtt subscription and submission worker pool.
//!     - RemoteConfig: remote data store endpoint (env overridable).
//!     - LoggingConfig: default tracing level.
//!
//! note:
//!     these are process tunables. device and broker records live in the
//!     json configuration file owned by store.rs, not here.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root settings structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServiceConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub bind_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { bind_addr: "0.0.0.0:5000".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("iot_config.json") }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BridgeConfig {
    /// wildcard subscription
    pub topic: String,
    /// topics containing this pattern carry no device field
    pub legacy_topic: String,
    pub default_device: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// remote submission workers
    pub workers: usize,
    /// pending remote submissions before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            topic: "sensors/#".to_string(),
            legacy_topic: "sensors/ammonia".to_string(),
            default_device: "Station_1".to_string(),
            client_id: "iot-ingest-bridge".to_string(),
            keep_alive_secs: 60,
            workers: 4,
            queue_capacity: 256,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RemoteConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub table: String,
    pub unit: String,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            table: "sensor_data".to_string(),
            unit: "ppm".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl ServiceConfig {
    /// Load settings from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read settings file: {}", e))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let mut config: ServiceConfig = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse settings: {}", e))?;
        config.remote.apply_env();
        Ok(config)
    }

    /// Load with default fallback
    ///
    /// An explicit path is tried alone; otherwise the conventional
    /// locations are searched in order. Runs before the tracing subscriber
    /// exists (the log level comes from here), so it reports on stderr.
    pub fn load_or_default(explicit: Option<&Path>) -> Self {
        let paths = match explicit {
            Some(path) => vec![path.to_path_buf()],
            None => vec![
                PathBuf::from("config").join("service.toml"),
                PathBuf::from("..").join("config").join("service.toml"),
            ],
        };

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        eprintln!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        eprintln!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        eprintln!("[CONFIG] Warning: No settings file found - using defaults");
        let mut config = Self::default();
        config.remote.apply_env();
        config
    }

    /// Log a settings summary
    pub fn print_summary(&self) {
        tracing::info!(
            bind_addr = %self.api.bind_addr,
            store = %self.store.path.display(),
            topic = %self.bridge.topic,
            workers = self.bridge.workers,
            queue_capacity = self.bridge.queue_capacity,
            remote_configured = self.remote.url.is_some(),
            log_level = %self.logging.level,
            "service settings"
        );
    }
}

impl RemoteConfig {
    /// `REMOTE_SINK_URL` and `REMOTE_SINK_KEY` win over the file.
    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("REMOTE_SINK_URL") {
            if !url.is_empty() {
                self.url = Some(url);
            }
        }
        if let Ok(key) = std::env::var("REMOTE_SINK_KEY") {
            if !key.is_empty() {
                self.api_key = Some(key);
            }
        }
    }
}
