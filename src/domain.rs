//! Configuration records shared by the api and the ingest bridge.
//!
//! Every record keeps keys it does not know about in a flattened `extra`
//! map so a load/save cycle never drops fields written by other tools.
//! Known fields are read leniently: files edited by hand or by older tools
//! carry quoted ports, `null` tokens and the like, and one such field must
//! not make the whole file unreadable.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

pub const SEED_DEVICE_ID: &str = "Station_1";
pub const SEED_DEVICE_UUID: &str = "46588dc3-c4d1-4269-b626-90116c8b97a4";
pub const DEFAULT_BROKER: &str = "192.168.1.142";
pub const DEFAULT_PORT: u16 = 1883;

/// Local wall-clock time in the `YYYY-MM-DDTHH:MM:SS.ffffff` form already
/// present in deployed configuration files.
pub fn timestamp_now() -> String {
    chrono::Local::now()
        .naive_local()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

/// whole configuration file
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RootConfig {
    #[serde(default, deserialize_with = "lenient::section")]
    pub devices: BTreeMap<String, DeviceConfig>,
    #[serde(default, deserialize_with = "lenient::section")]
    pub mqtt: BrokerConfig,
    #[serde(default, deserialize_with = "lenient::section")]
    pub local_logging: LocalLoggingConfig,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// one sensor station, keyed by `device_id` in `RootConfig::devices`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    #[serde(deserialize_with = "lenient::text")]
    pub device_id: String,
    #[serde(deserialize_with = "lenient::text")]
    pub broker: String,
    #[serde(deserialize_with = "lenient::port")]
    pub port: u16,
    #[serde(deserialize_with = "lenient::text")]
    pub topic_prefix: String,
    #[serde(deserialize_with = "lenient::flag")]
    pub enabled: bool,
    /// identity token of this station in the remote data store
    #[serde(deserialize_with = "lenient::text")]
    pub uuid: String,
    #[serde(deserialize_with = "lenient::text")]
    pub last_updated: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    #[serde(deserialize_with = "lenient::text")]
    pub broker: String,
    #[serde(deserialize_with = "lenient::port")]
    pub port: u16,
    #[serde(deserialize_with = "lenient::flag")]
    pub use_auth: bool,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::optional_text")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::optional_text")]
    pub password: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalLoggingConfig {
    #[serde(deserialize_with = "lenient::text")]
    pub csv_file: String,
    #[serde(deserialize_with = "lenient::flag")]
    pub enable_csv: bool,
    /// gates the remote insert; key name kept for existing files
    #[serde(rename = "enable_supabase", deserialize_with = "lenient::flag")]
    pub enable_remote: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            broker: String::new(),
            port: DEFAULT_PORT,
            topic_prefix: "iot/".to_string(),
            enabled: true,
            uuid: String::new(),
            last_updated: String::new(),
            extra: Map::new(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker: DEFAULT_BROKER.to_string(),
            port: DEFAULT_PORT,
            use_auth: false,
            username: None,
            password: None,
            extra: Map::new(),
        }
    }
}

impl Default for LocalLoggingConfig {
    fn default() -> Self {
        Self {
            csv_file: "sensor_data.csv".to_string(),
            enable_csv: true,
            enable_remote: true,
            extra: Map::new(),
        }
    }
}

impl RootConfig {
    /// The built-in configuration: one seeded station, default broker and
    /// logging, all stamped with `stamp`.
    pub fn seeded(stamp: &str) -> Self {
        let station = DeviceConfig {
            device_id: SEED_DEVICE_ID.to_string(),
            broker: DEFAULT_BROKER.to_string(),
            uuid: SEED_DEVICE_UUID.to_string(),
            last_updated: stamp.to_string(),
            ..DeviceConfig::default()
        };

        let mut devices = BTreeMap::new();
        devices.insert(SEED_DEVICE_ID.to_string(), station);

        Self {
            devices,
            mqtt: BrokerConfig::default(),
            local_logging: LocalLoggingConfig::default(),
            extra: Map::new(),
        }
    }

    /// device key -> identity token, skipping stations without a token
    pub fn identity_map(&self) -> HashMap<String, String> {
        self.devices
            .iter()
            .filter(|(_, device)| !device.uuid.is_empty())
            .map(|(id, device)| (id.clone(), device.uuid.clone()))
            .collect()
    }
}

impl DeviceConfig {
    /// Merge `patch` over this record and stamp it as `device_id`.
    ///
    /// Keys absent from the patch keep their value. A record that ends up
    /// without an identity token gets a fresh one; an existing token is
    /// only replaced when the patch names one explicitly.
    pub fn merged(&self, device_id: &str, patch: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        let mut device: DeviceConfig = merge_fields(self, patch)?;
        device.device_id = device_id.to_string();
        device.last_updated = timestamp_now();
        if device.uuid.trim().is_empty() {
            device.uuid = uuid::Uuid::new_v4().to_string();
        }
        Ok(device)
    }
}

impl BrokerConfig {
    pub fn merged(&self, patch: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        merge_fields(self, patch)
    }
}

/// Field-level overlay of a JSON object onto a record.
fn merge_fields<T>(base: &T, patch: &Map<String, Value>) -> Result<T, serde_json::Error>
where
    T: Serialize + DeserializeOwned,
{
    let mut value = serde_json::to_value(base)?;
    if let Value::Object(fields) = &mut value {
        for (key, patched) in patch {
            fields.insert(key.clone(), patched.clone());
        }
    }
    serde_json::from_value(value)
}

/// Field deserializers that accept the loose types found in real files.
///
/// `null` reads as the empty or false value, scalars are coerced between
/// string and number where the meaning is unambiguous. Anything else, such
/// as a port of `"high"`, is still an error.
mod lenient {
    use serde::de::{Deserialize, DeserializeOwned, Deserializer, Error};
    use serde_json::Value;

    pub fn section<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned + Default,
    {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(T::default()),
            value => serde_json::from_value(value).map_err(D::Error::custom),
        }
    }

    pub fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(optional_text(deserializer)?.unwrap_or_default())
    }

    pub fn optional_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            Value::Number(n) => Ok(Some(n.to_string())),
            Value::Bool(b) => Ok(Some(b.to_string())),
            other => Err(D::Error::custom(format!("expected a string, got {}", other))),
        }
    }

    pub fn port<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let port = match &value {
            Value::Null => Some(super::DEFAULT_PORT),
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
                .and_then(|n| u16::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        port.ok_or_else(|| D::Error::custom(format!("invalid port {}", value)))
    }

    pub fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let flag = match &value {
            Value::Null => Some(false),
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|n| n != 0.0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" | "" => Some(false),
                _ => None,
            },
            _ => None,
        };
        flag.ok_or_else(|| D::Error::custom(format!("invalid flag {}", value)))
    }
}
