//! Sensor payload decoding and device resolution.
//!
//! Stations publish JSON objects such as
//! `{"id": "Station_2", "ammonia": 3.4, "temperature": 29.1, "humidity": 71.0, "calibratedRo": 12.8}`.
//! Older firmware publishes on the legacy topic without an `id` field.

use chrono::{DateTime, Local};
use serde_json::{Map, Value};

use super::IngestError;

/// How a topic maps to a device when the payload does not say.
#[derive(Debug, Clone)]
pub struct TopicRules {
    /// topics containing this pattern never carry a device field
    pub legacy_topic: String,
    pub default_device: String,
}

/// One decoded message. Never persisted as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub device_id: String,
    /// measured concentration
    pub value: f64,
    pub temperature: f64,
    pub humidity: f64,
    /// sensor calibration resistance (Ro)
    pub calibration: f64,
    pub received_at: DateTime<Local>,
}

const DEVICE_KEYS: &[&str] = &["id", "device_id", "deviceId"];
const VALUE_KEYS: &[&str] = &["ammonia", "nh3"];
const TEMPERATURE_KEYS: &[&str] = &["temperature", "temp"];
const HUMIDITY_KEYS: &[&str] = &["humidity", "hum"];
const CALIBRATION_KEYS: &[&str] = &["calibratedRo"];

impl TopicRules {
    pub fn is_legacy(&self, topic: &str) -> bool {
        !self.legacy_topic.is_empty() && topic.contains(&self.legacy_topic)
    }

    /// Decode `payload` received on `topic`.
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<SensorReading, IngestError> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| IngestError::MalformedPayload(format!("not UTF-8: {}", e)))?;
        let fields = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(fields)) => fields,
            Ok(other) => {
                return Err(IngestError::MalformedPayload(format!(
                    "expected a JSON object, got {}",
                    kind(&other)
                )))
            }
            Err(e) => return Err(IngestError::MalformedPayload(e.to_string())),
        };

        let device_id = if self.is_legacy(topic) {
            self.default_device.clone()
        } else {
            device_field(&fields)?.unwrap_or_else(|| self.default_device.clone())
        };

        Ok(SensorReading {
            device_id,
            value: number_field(&fields, VALUE_KEYS)?,
            temperature: number_field(&fields, TEMPERATURE_KEYS)?,
            humidity: number_field(&fields, HUMIDITY_KEYS)?,
            calibration: number_field(&fields, CALIBRATION_KEYS)?,
            received_at: Local::now(),
        })
    }
}

/// First non-null key wins.
fn lookup<'a, 'k>(fields: &'a Map<String, Value>, keys: &[&'k str]) -> Option<(&'k str, &'a Value)> {
    keys.iter().find_map(|&key| {
        fields
            .get(key)
            .filter(|value| !value.is_null())
            .map(|value| (key, value))
    })
}

fn device_field(fields: &Map<String, Value>) -> Result<Option<String>, IngestError> {
    match lookup(fields, DEVICE_KEYS) {
        None => Ok(None),
        Some((_, Value::String(id))) if id.trim().is_empty() => Ok(None),
        Some((_, Value::String(id))) => Ok(Some(id.clone())),
        Some((_, Value::Number(id))) => Ok(Some(id.to_string())),
        Some((key, other)) => Err(IngestError::MalformedPayload(format!(
            "field '{}' must be a string, got {}",
            key,
            kind(other)
        ))),
    }
}

/// Numbers and numeric strings (some firmware quotes its readings).
fn number_field(fields: &Map<String, Value>, keys: &[&str]) -> Result<f64, IngestError> {
    let (key, value) = match lookup(fields, keys) {
        None => return Ok(0.0),
        Some(found) => found,
    };
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    };
    number.ok_or_else(|| {
        IngestError::MalformedPayload(format!("field '{}' must be a number, got {}", key, kind(value)))
    })
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
