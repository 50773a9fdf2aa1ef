//! Per-message fan-out to the local log and the remote store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::csv_log::CsvLog;
use super::dispatch::RemoteDispatcher;
use super::payload::{SensorReading, TopicRules};
use super::remote::RemoteRecord;
use super::IngestError;
use crate::domain::RootConfig;

/// Immutable view of the configuration file taken once at startup.
///
/// Devices added through the api afterwards are not visible until the
/// bridge is restarted.
#[derive(Debug, Clone)]
pub struct BridgeSnapshot {
    /// device key -> remote identity token
    pub identities: HashMap<String, String>,
    pub csv_path: PathBuf,
    pub enable_csv: bool,
    pub enable_remote: bool,
    pub broker: String,
    pub port: u16,
    pub credentials: Option<(String, String)>,
}

impl BridgeSnapshot {
    pub fn from_config(config: &RootConfig) -> Self {
        let credentials = config.mqtt.use_auth.then(|| {
            (
                config.mqtt.username.clone().unwrap_or_default(),
                config.mqtt.password.clone().unwrap_or_default(),
            )
        });

        Self {
            identities: config.identity_map(),
            csv_path: PathBuf::from(&config.local_logging.csv_file),
            enable_csv: config.local_logging.enable_csv,
            enable_remote: config.local_logging.enable_remote,
            broker: config.mqtt.broker.clone(),
            port: config.mqtt.port,
            credentials,
        }
    }
}

/// What happened to one sink for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    Written,
    Queued,
    Disabled,
    /// no identity token for the device
    Unmapped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub device_id: String,
    pub local: SinkOutcome,
    pub remote: SinkOutcome,
}

pub struct MessageHandler {
    snapshot: Arc<BridgeSnapshot>,
    rules: TopicRules,
    unit: String,
    csv: Option<Arc<CsvLog>>,
    remote: Option<RemoteDispatcher>,
}

impl MessageHandler {
    /// `remote` is `None` when no sink is configured; the snapshot's
    /// logging flags can disable either side further.
    pub fn new(
        snapshot: Arc<BridgeSnapshot>,
        rules: TopicRules,
        unit: impl Into<String>,
        remote: Option<RemoteDispatcher>,
    ) -> Self {
        let csv = snapshot
            .enable_csv
            .then(|| Arc::new(CsvLog::new(snapshot.csv_path.clone())));
        let remote = remote.filter(|_| snapshot.enable_remote);

        Self { snapshot, rules, unit: unit.into(), csv, remote }
    }

    /// Decode one message and fan it out.
    ///
    /// Only a malformed payload is an error; sink failures are logged and
    /// reported in the outcome without affecting the other sink.
    pub async fn handle(&self, topic: &str, payload: &[u8]) -> Result<Outcome, IngestError> {
        let reading = self.rules.decode(topic, payload).map_err(|e| {
            tracing::warn!(
                topic,
                error = %e,
                raw = %String::from_utf8_lossy(payload),
                "dropping message"
            );
            e
        })?;

        tracing::info!(topic, device = %reading.device_id, value = reading.value, "received reading");

        Ok(Outcome {
            local: self.write_local(&reading).await,
            remote: self.send_remote(&reading),
            device_id: reading.device_id,
        })
    }

    /// File I/O runs on the blocking pool, off the event loop.
    async fn write_local(&self, reading: &SensorReading) -> SinkOutcome {
        let Some(csv) = &self.csv else {
            return SinkOutcome::Disabled;
        };
        let csv = Arc::clone(csv);
        let row = reading.clone();
        let result = tokio::task::spawn_blocking(move || csv.append(&row)).await;

        match result {
            Ok(Ok(())) => {
                tracing::debug!(device = %reading.device_id, path = %self.snapshot.csv_path.display(), "saved csv row");
                SinkOutcome::Written
            }
            Ok(Err(e)) => {
                tracing::error!(device = %reading.device_id, error = %e, "csv append failed");
                SinkOutcome::Failed
            }
            Err(e) => {
                tracing::error!(device = %reading.device_id, error = %e, "csv append task failed");
                SinkOutcome::Failed
            }
        }
    }

    fn send_remote(&self, reading: &SensorReading) -> SinkOutcome {
        let Some(remote) = &self.remote else {
            return SinkOutcome::Disabled;
        };
        let Some(token) = self.snapshot.identities.get(&reading.device_id) else {
            tracing::warn!(device = %reading.device_id, "no identity token for device, skipping upload");
            return SinkOutcome::Unmapped;
        };

        let record = RemoteRecord {
            device_id: token.clone(),
            value: reading.value,
            unit: self.unit.clone(),
            temperature: reading.temperature,
            humidity: reading.humidity,
            timestamp: crate::domain::timestamp_now(),
        };
        match remote.submit(record) {
            Ok(()) => SinkOutcome::Queued,
            Err(e) => {
                tracing::error!(device = %reading.device_id, error = %e, "remote submission dropped");
                SinkOutcome::Failed
            }
        }
    }

    /// Stop the remote workers, letting queued records finish.
    pub async fn shutdown(self, grace: std::time::Duration) {
        if let Some(remote) = self.remote {
            remote.shutdown(grace).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SEED_DEVICE_ID, SEED_DEVICE_UUID};
    use crate::ingest::remote::RemoteSink;
    use crate::ingest::SinkError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<RemoteRecord>>,
        fail: bool,
    }

    #[async_trait]
    impl RemoteSink for RecordingSink {
        async fn insert(&self, record: &RemoteRecord) -> Result<(), SinkError> {
            self.records.lock().unwrap().push(record.clone());
            if self.fail {
                return Err(SinkError::Rejected { status: 503, body: "unavailable".into() });
            }
            Ok(())
        }
        fn name(&self) -> &str {
            "recording"
        }
    }

    fn rules() -> TopicRules {
        TopicRules {
            legacy_topic: "sensors/ammonia".into(),
            default_device: SEED_DEVICE_ID.into(),
        }
    }

    fn snapshot(dir: &std::path::Path) -> Arc<BridgeSnapshot> {
        let mut config = RootConfig::seeded("2025-01-01T00:00:00.000000");
        config.local_logging.csv_file = dir.join("sensor_data.csv").display().to_string();
        Arc::new(BridgeSnapshot::from_config(&config))
    }

    fn handler(snapshot: Arc<BridgeSnapshot>, sink: Arc<RecordingSink>) -> MessageHandler {
        let dispatcher = RemoteDispatcher::spawn(sink, 1, 8);
        MessageHandler::new(snapshot, rules(), "ppm", Some(dispatcher))
    }

    fn csv_rows(snapshot: &BridgeSnapshot) -> Vec<String> {
        std::fs::read_to_string(&snapshot.csv_path)
            .unwrap()
            .lines()
            .skip(1)
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn legacy_message_goes_to_both_sinks_as_default_device() {
        let dir = tempdir().unwrap();
        let snapshot = snapshot(dir.path());
        let sink = Arc::new(RecordingSink::default());
        let handler = handler(snapshot.clone(), sink.clone());

        let outcome = handler
            .handle("sensors/ammonia", br#"{"ammonia": 4.2, "temperature": 28.0, "humidity": 65.0}"#)
            .await
            .unwrap();
        handler.shutdown(Duration::from_secs(5)).await;

        assert_eq!(outcome.device_id, SEED_DEVICE_ID);
        assert_eq!(outcome.local, SinkOutcome::Written);
        assert_eq!(outcome.remote, SinkOutcome::Queued);

        let rows = csv_rows(&snapshot);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].contains(",Station_1,4.2,28.0,65.0,0.0"));

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].device_id, SEED_DEVICE_UUID);
        assert_eq!(records[0].value, 4.2);
        assert_eq!(records[0].unit, "ppm");
    }

    #[tokio::test]
    async fn quoted_reading_reaches_both_sinks() {
        let dir = tempdir().unwrap();
        let snapshot = snapshot(dir.path());
        let sink = Arc::new(RecordingSink::default());
        let handler = handler(snapshot.clone(), sink.clone());

        let outcome = handler
            .handle("sensors/station", br#"{"id": "Station_1", "ammonia": "3.4", "temperature": "27.5"}"#)
            .await
            .unwrap();
        handler.shutdown(Duration::from_secs(5)).await;

        assert_eq!(outcome.local, SinkOutcome::Written);
        assert_eq!(outcome.remote, SinkOutcome::Queued);
        assert!(csv_rows(&snapshot)[0].contains(",Station_1,3.4,27.5,"));
        assert_eq!(sink.records.lock().unwrap()[0].value, 3.4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_messages_share_one_header() {
        let dir = tempdir().unwrap();
        let snapshot = snapshot(dir.path());
        let sink = Arc::new(RecordingSink::default());
        let handler = handler(snapshot.clone(), sink);

        let payload = br#"{"id": "Station_1", "ammonia": 1.0}"#;
        let (a, b) = tokio::join!(
            handler.handle("sensors/station", payload),
            handler.handle("sensors/station", payload)
        );
        a.unwrap();
        b.unwrap();
        handler.shutdown(Duration::from_secs(5)).await;

        let text = std::fs::read_to_string(&snapshot.csv_path).unwrap();
        assert_eq!(text.matches("Timestamp").count(), 1);
        assert_eq!(csv_rows(&snapshot).len(), 2);
    }

    #[tokio::test]
    async fn unmapped_device_is_logged_locally_only() {
        let dir = tempdir().unwrap();
        let snapshot = snapshot(dir.path());
        let sink = Arc::new(RecordingSink::default());
        let handler = handler(snapshot.clone(), sink.clone());

        let outcome = handler
            .handle("sensors/station", br#"{"id": "Station_99", "ammonia": 1.0}"#)
            .await
            .unwrap();
        handler.shutdown(Duration::from_secs(5)).await;

        assert_eq!(outcome.local, SinkOutcome::Written);
        assert_eq!(outcome.remote, SinkOutcome::Unmapped);
        assert_eq!(csv_rows(&snapshot).len(), 1);
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn remote_failure_does_not_affect_local_log() {
        let dir = tempdir().unwrap();
        let snapshot = snapshot(dir.path());
        let sink = Arc::new(RecordingSink { fail: true, ..RecordingSink::default() });
        let handler = handler(snapshot.clone(), sink.clone());

        for _ in 0..3 {
            handler
                .handle("sensors/station", br#"{"id": "Station_1", "ammonia": 2.5}"#)
                .await
                .unwrap();
        }
        handler.shutdown(Duration::from_secs(5)).await;

        assert_eq!(sink.records.lock().unwrap().len(), 3);
        assert_eq!(csv_rows(&snapshot).len(), 3);
    }

    #[tokio::test]
    async fn local_failure_does_not_block_remote() {
        let dir = tempdir().unwrap();
        let mut config = RootConfig::seeded("2025-01-01T00:00:00.000000");
        config.local_logging.csv_file = dir.path().join("missing").join("log.csv").display().to_string();
        let snapshot = Arc::new(BridgeSnapshot::from_config(&config));
        let sink = Arc::new(RecordingSink::default());
        let handler = handler(snapshot, sink.clone());

        let outcome = handler
            .handle("sensors/station", br#"{"id": "Station_1", "ammonia": 2.5}"#)
            .await
            .unwrap();
        handler.shutdown(Duration::from_secs(5)).await;

        assert_eq!(outcome.local, SinkOutcome::Failed);
        assert_eq!(outcome.remote, SinkOutcome::Queued);
        assert_eq!(sink.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_payload_touches_no_sink() {
        let dir = tempdir().unwrap();
        let snapshot = snapshot(dir.path());
        let sink = Arc::new(RecordingSink::default());
        let handler = handler(snapshot.clone(), sink.clone());

        let err = handler.handle("sensors/station", b"{not json").await.unwrap_err();
        handler.shutdown(Duration::from_secs(5)).await;

        assert!(matches!(err, IngestError::MalformedPayload(_)));
        assert!(!snapshot.csv_path.exists());
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn logging_flags_disable_sinks() {
        let dir = tempdir().unwrap();
        let mut config = RootConfig::seeded("2025-01-01T00:00:00.000000");
        config.local_logging.csv_file = dir.path().join("sensor_data.csv").display().to_string();
        config.local_logging.enable_csv = false;
        config.local_logging.enable_remote = false;
        let snapshot = Arc::new(BridgeSnapshot::from_config(&config));
        let sink = Arc::new(RecordingSink::default());
        let handler = handler(snapshot.clone(), sink.clone());

        let outcome = handler
            .handle("sensors/ammonia", br#"{"ammonia": 1.0}"#)
            .await
            .unwrap();
        handler.shutdown(Duration::from_secs(5)).await;

        assert_eq!(outcome.local, SinkOutcome::Disabled);
        assert_eq!(outcome.remote, SinkOutcome::Disabled);
        assert!(!snapshot.csv_path.exists());
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[test]
    fn snapshot_carries_credentials_only_with_auth() {
        let mut config = RootConfig::seeded("t");
        assert_eq!(BridgeSnapshot::from_config(&config).credentials, None);

        config.mqtt.use_auth = true;
        config.mqtt.username = Some("pi".into());
        let snapshot = BridgeSnapshot::from_config(&config);
        assert_eq!(snapshot.credentials, Some(("pi".to_string(), String::new())));
    }
}
