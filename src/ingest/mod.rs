//! ==============================================================================
//! ingest - mqtt telemetry bridge
//! ==============================================================================
//!
//! purpose:
//!     subscribes to the sensor topic tree and fans every reading out to a
//!     local csv log and the remote data store.
//!
//! lifecycle:
//!
//! ```text
//!     Starting ──> Running ──(ctrl-c)──> Stopping ──> Stopped
//!
//!     Starting: one load of the configuration file, snapshot built
//!     Running:  mqtt event loop, one handle() per publish
//!     Stopping: mqtt disconnect, remote queue drained (bounded wait)
//! ```
//!
//! relationships:
//!     - payload.rs:  decode + device resolution
//!     - csv_log.rs:  local append
//!     - remote.rs:   remote sink trait + rest implementation
//!     - dispatch.rs: bounded worker pool in front of the remote sink
//!     - handler.rs:  per-message fan-out
//!
//! the broker client owns reconnection; this loop only logs connection
//! errors and keeps polling.
//!
//! ==============================================================================

mod csv_log;
mod dispatch;
mod error;
mod handler;
mod payload;
mod remote;

pub use csv_log::{CsvLog, HEADER};
pub use dispatch::RemoteDispatcher;
pub use error::{IngestError, SinkError};
pub use handler::{BridgeSnapshot, MessageHandler, Outcome, SinkOutcome};
pub use payload::{SensorReading, TopicRules};
pub use remote::{RemoteRecord, RemoteSink, RestSink};

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ServiceConfig;
use crate::store::ConfigStore;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const RETRY_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

pub struct IngestBridge {
    state: BridgeState,
    settings: ServiceConfig,
    snapshot: Arc<BridgeSnapshot>,
    handler: MessageHandler,
}

impl IngestBridge {
    /// Starting: snapshot the configuration file and wire up the sinks.
    ///
    /// Must be called inside a tokio runtime when `sink` is given, since
    /// the remote workers are spawned here.
    pub fn start(settings: ServiceConfig, store: &ConfigStore, sink: Option<Arc<dyn RemoteSink>>) -> Self {
        tracing::info!(state = %BridgeState::Starting, "ingest bridge");

        let snapshot = Arc::new(BridgeSnapshot::from_config(&store.load()));
        let mut devices: Vec<_> = snapshot.identities.keys().cloned().collect();
        devices.sort();
        tracing::info!(
            broker = %snapshot.broker,
            port = snapshot.port,
            topic = %settings.bridge.topic,
            csv = %snapshot.csv_path.display(),
            ?devices,
            "config snapshot loaded"
        );

        let dispatcher = match sink {
            Some(sink) if snapshot.enable_remote => Some(RemoteDispatcher::spawn(
                sink,
                settings.bridge.workers,
                settings.bridge.queue_capacity,
            )),
            Some(_) => {
                tracing::info!("remote uploads disabled by local_logging flags");
                None
            }
            None => {
                tracing::warn!("no remote sink configured, readings are logged locally only");
                None
            }
        };

        let rules = TopicRules {
            legacy_topic: settings.bridge.legacy_topic.clone(),
            default_device: settings.bridge.default_device.clone(),
        };
        let handler = MessageHandler::new(Arc::clone(&snapshot), rules, settings.remote.unit.clone(), dispatcher);

        Self {
            state: BridgeState::Starting,
            settings,
            snapshot,
            handler,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn snapshot(&self) -> &BridgeSnapshot {
        &self.snapshot
    }

    /// Running until `shutdown` resolves, then Stopping and Stopped.
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let bridge = &self.settings.bridge;
        let mut options = MqttOptions::new(&bridge.client_id, &self.snapshot.broker, self.snapshot.port);
        options.set_keep_alive(Duration::from_secs(bridge.keep_alive_secs.max(5)));
        if let Some((username, password)) = &self.snapshot.credentials {
            options.set_credentials(username, password);
        }
        let topic = bridge.topic.clone();

        let (client, mut eventloop) = AsyncClient::new(options, 16);
        self.transition(BridgeState::Running);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // subscriptions do not survive a reconnect
                        tracing::info!(broker = %self.snapshot.broker, topic = %topic, "connected, subscribing");
                        if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                            tracing::error!(error = %e, "subscribe request failed");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        // failures are logged by the handler and end with this message
                        let _ = self.handler.handle(&publish.topic, &publish.payload).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "mqtt connection error, retrying");
                        tokio::time::sleep(RETRY_PAUSE).await;
                    }
                },
            }
        }

        self.transition(BridgeState::Stopping);
        if let Err(e) = client.try_disconnect() {
            tracing::debug!(error = %e, "disconnect request failed");
        }
        let state = self.state;
        self.handler.shutdown(SHUTDOWN_GRACE).await;
        tracing::info!(from = %state, state = %BridgeState::Stopped, "ingest bridge");
        Ok(())
    }

    fn transition(&mut self, next: BridgeState) {
        tracing::info!(from = %self.state, state = %next, "ingest bridge");
        self.state = next;
    }
}
