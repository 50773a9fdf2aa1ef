//! ==============================================================================
//! iot-config-bridge - device configuration store + telemetry ingest bridge
//! ==============================================================================
//!
//! two processes share one artifact, the json configuration file:
//!
//! ```text
//!     ┌──────────────┐   load/save   ┌────────────────┐
//!     │  config-api  │ ────────────> │ iot_config.json│
//!     │  (axum)      │               └───────┬────────┘
//!     └──────────────┘                       │ one load at startup
//!                                            ▼
//!     mqtt broker ──publish──> ┌──────────────────┐ ──> sensor_data.csv
//!                              │  ingest-bridge   │
//!                              │  (rumqttc)       │ ──> remote data store
//!                              └──────────────────┘
//! ```
//!
//! modules:
//!     - config:  service.toml settings (bind address, topics, workers, remote)
//!     - domain:  configuration records and merge rules
//!     - store:   locked, atomic json file access
//!     - api:     http routes over the store
//!     - ingest:  mqtt bridge, csv log, remote sink
//!     - logging: tracing subscriber setup shared by both binaries
//!
//! ==============================================================================

pub mod api;
pub mod config;
pub mod domain;
pub mod ingest;
pub mod logging;
pub mod store;
