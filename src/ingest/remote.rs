//! Remote data store sink.
//!
//! The store is reached through a PostgREST-style REST endpoint:
//! `POST {url}/rest/v1/{table}` with the api key as both `apikey` header
//! and bearer token. Transport and auth belong to that service; this side
//! only owns the row shape.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use super::SinkError;
use crate::config::RemoteConfig;

/// Row inserted into the remote sensor table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteRecord {
    /// identity token of the station, not its human-readable key
    pub device_id: String,
    pub value: f64,
    pub unit: String,
    pub temperature: f64,
    pub humidity: f64,
    pub timestamp: String,
}

/// An insert-only destination for sensor rows.
#[async_trait]
pub trait RemoteSink: Send + Sync {
    async fn insert(&self, record: &RemoteRecord) -> Result<(), SinkError>;
    /// Human-readable sink name for logs.
    fn name(&self) -> &str;
}

pub struct RestSink {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl RestSink {
    pub fn new(base_url: &str, api_key: &str, table: &str, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: format!("{}/rest/v1/{}", base_url.trim_end_matches('/'), table),
            api_key: api_key.to_string(),
            client,
        })
    }

    /// `None` when no url is configured, which disables remote inserts.
    pub fn from_config(config: &RemoteConfig) -> Result<Option<Self>, SinkError> {
        let Some(url) = config.url.as_deref().filter(|url| !url.is_empty()) else {
            return Ok(None);
        };
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| SinkError::Config("remote url is set but api_key is missing".to_string()))?;

        Self::new(url, api_key, &config.table, Duration::from_secs(config.timeout_secs)).map(Some)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RemoteSink for RestSink {
    async fn insert(&self, record: &RemoteRecord) -> Result<(), SinkError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "return=minimal")
            .json(record)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(SinkError::Rejected { status: status.as_u16(), body })
    }

    fn name(&self) -> &str {
        "rest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_table() {
        let sink = RestSink::new("https://store.example.com/", "key", "sensor_data", Duration::from_secs(5)).unwrap();
        assert_eq!(sink.endpoint(), "https://store.example.com/rest/v1/sensor_data");
    }

    #[test]
    fn missing_url_disables_sink() {
        let config = RemoteConfig::default();
        assert!(RestSink::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn url_without_key_is_a_config_error() {
        let config = RemoteConfig {
            url: Some("https://store.example.com".into()),
            api_key: None,
            ..RemoteConfig::default()
        };
        assert!(matches!(RestSink::from_config(&config), Err(SinkError::Config(_))));
    }

    #[test]
    fn record_serializes_field_contract() {
        let record = RemoteRecord {
            device_id: "46588dc3-c4d1-4269-b626-90116c8b97a4".into(),
            value: 3.5,
            unit: "ppm".into(),
            temperature: 29.0,
            humidity: 70.5,
            timestamp: "2025-03-14T09:26:53.000000".into(),
        };
        let value = serde_json::to_value(&record).unwrap();
        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["device_id", "humidity", "temperature", "timestamp", "unit", "value"]);
    }
}
