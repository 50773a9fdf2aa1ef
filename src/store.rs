//! ==============================================================================
//! store.rs - json configuration file owner
//! ==============================================================================
//!
//! purpose:
//!     single owner of the on-disk configuration. every read goes to disk,
//!     every write replaces the whole document.
//!
//! locking:
//!     one mutex per store serialises each individual load and save.
//!     it is NOT held across a load-modify-save sequence, so two callers
//!     editing the same device concurrently race and the last save wins.
//!
//! unreadable files:
//!     `load` serves the defaults when the file cannot be read or parsed.
//!     writers go through `load_for_update`, which refuses instead, so a
//!     request never replaces a file it could not read. only `reset`
//!     overwrites such a file.
//!
//! durability:
//!     saves go to a temp file in the same directory which is synced and
//!     renamed over the target. a failed save leaves the previous file
//!     untouched.
//!
//! ==============================================================================

use crate::domain::{timestamp_now, RootConfig};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub struct ConfigStore {
    path: PathBuf,
    lock: Mutex<()>,
    /// built-in configuration, stamped once at construction
    defaults: RootConfig,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            defaults: RootConfig::seeded(&timestamp_now()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn defaults(&self) -> &RootConfig {
        &self.defaults
    }

    /// Read the configuration file.
    ///
    /// A missing file yields the defaults. So does a file that cannot be
    /// read or parsed, which is logged at error level since it usually
    /// means the file is corrupt.
    pub fn load(&self) -> RootConfig {
        let _guard = self.guard();

        match self.read() {
            Ok(Some(config)) => config,
            Ok(None) => self.defaults.clone(),
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "failed to load config, using defaults");
                self.defaults.clone()
            }
        }
    }

    /// Read the configuration file ahead of a modification.
    ///
    /// Like `load` for a missing file, but an existing file that cannot be
    /// read or parsed is an error rather than the defaults.
    pub fn load_for_update(&self) -> Result<RootConfig, StoreError> {
        let _guard = self.guard();
        Ok(self.read()?.unwrap_or_else(|| self.defaults.clone()))
    }

    /// Replace the configuration file with `config`, pretty-printed.
    pub fn save(&self, config: &RootConfig) -> Result<(), StoreError> {
        let _guard = self.guard();
        self.write(config)
    }

    /// Overwrite the file with the built-in configuration.
    pub fn reset(&self) -> Result<RootConfig, StoreError> {
        let defaults = self.defaults.clone();
        self.save(&defaults)?;
        Ok(defaults)
    }

    /// Write the defaults if no configuration file exists yet.
    pub fn ensure_initialized(&self) -> Result<bool, StoreError> {
        let _guard = self.guard();
        if self.path.exists() {
            return Ok(false);
        }
        tracing::info!(path = %self.path.display(), "creating default config");
        self.write(&self.defaults)?;
        Ok(true)
    }

    /// `None` when the file does not exist. Caller holds the guard.
    fn read(&self) -> Result<Option<RootConfig>, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path: self.path.clone(), source }),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Parse { path: self.path.clone(), source })
    }

    /// Caller holds the guard.
    fn write(&self, config: &RootConfig) -> Result<(), StoreError> {
        let mut body = serde_json::to_vec_pretty(config)?;
        body.push(b'\n');
        self.write_atomic(&body)?;

        tracing::info!(path = %self.path.display(), devices = config.devices.len(), "config saved");
        Ok(())
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        // the guarded data is (), a panicked holder cannot leave it inconsistent
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_atomic(&self, body: &[u8]) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let io_err = |source: std::io::Error| StoreError::Io { path: self.path.clone(), source };

        let mut tmp = tempfile::Builder::new()
            .prefix(".iot_config")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(io_err)?;
        tmp.write_all(body).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeviceConfig, SEED_DEVICE_ID};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("iot_config.json"));

        let config = store.load();
        assert_eq!(&config, store.defaults());
        assert!(config.devices.contains_key(SEED_DEVICE_ID));
        assert!(!store.path().exists());
    }

    #[test]
    fn corrupt_file_loads_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("iot_config.json");
        std::fs::write(&path, "{\"devices\": {").unwrap();

        let store = ConfigStore::new(&path);
        assert_eq!(&store.load(), store.defaults());
        // fallback never rewrites the corrupt file
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"devices\": {");
    }

    #[test]
    fn update_load_refuses_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("iot_config.json");
        std::fs::write(&path, "{\"devices\": {").unwrap();

        let store = ConfigStore::new(&path);
        assert!(matches!(store.load_for_update(), Err(StoreError::Parse { .. })));

        store.reset().unwrap();
        assert_eq!(store.load_for_update().unwrap(), *store.defaults());
    }

    #[test]
    fn update_load_of_missing_file_is_defaults() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("iot_config.json"));
        assert_eq!(store.load_for_update().unwrap(), *store.defaults());
    }

    #[test]
    fn loosely_typed_file_loads_without_fallback() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("iot_config.json");
        std::fs::write(
            &path,
            r#"{
  "devices": {
    "Station_9": {"device_id": "Station_9", "broker": "10.0.0.9", "port": "1883", "uuid": null, "enabled": "true"}
  },
  "mqtt": {"broker": "10.0.0.50", "port": "1884", "use_auth": 0, "username": null},
  "local_logging": null
}"#,
        )
        .unwrap();

        let store = ConfigStore::new(&path);
        let config = store.load_for_update().unwrap();
        assert_eq!(config, store.load());

        let station = &config.devices["Station_9"];
        assert_eq!(station.broker, "10.0.0.9");
        assert_eq!(station.port, 1883);
        assert_eq!(station.uuid, "");
        assert!(station.enabled);
        assert!(!config.devices.contains_key(SEED_DEVICE_ID));
        assert_eq!(config.mqtt.broker, "10.0.0.50");
        assert_eq!(config.mqtt.port, 1884);
        assert!(!config.mqtt.use_auth);
        assert_eq!(config.mqtt.username, None);
        assert!(config.local_logging.enable_csv);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("iot_config.json"));

        let mut config = store.load();
        config.mqtt.use_auth = true;
        config.mqtt.username = Some("pi".into());
        config.devices.insert(
            "Station_9".into(),
            DeviceConfig {
                device_id: "Station_9".into(),
                uuid: "token-9".into(),
                ..DeviceConfig::default()
            },
        );
        config.extra.insert("note".into(), serde_json::json!("kept"));

        store.save(&config).unwrap();
        assert_eq!(store.load(), config);

        store.save(&store.load()).unwrap();
        assert_eq!(store.load(), config);
    }

    #[test]
    fn saved_file_is_indented_json() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("iot_config.json"));
        store.save(store.defaults()).unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.starts_with("{\n  \"devices\""));
    }

    #[test]
    fn reset_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("iot_config.json"));

        let first = store.reset().unwrap();
        let on_disk_first = std::fs::read(store.path()).unwrap();
        let second = store.reset().unwrap();
        let on_disk_second = std::fs::read(store.path()).unwrap();

        assert_eq!(first, second);
        assert_eq!(on_disk_first, on_disk_second);
    }

    #[test]
    fn failed_save_leaves_previous_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("iot_config.json");
        let store = ConfigStore::new(&path);
        store.save(store.defaults()).unwrap();
        let before = std::fs::read(&path).unwrap();

        let broken = ConfigStore::new(dir.path().join("missing").join("iot_config.json"));
        assert!(matches!(broken.save(store.defaults()), Err(StoreError::Io { .. })));

        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn save_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("iot_config.json"));
        store.save(store.defaults()).unwrap();
        store.save(store.defaults()).unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("iot_config.json")]);
    }

    #[test]
    fn ensure_initialized_only_writes_once() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("iot_config.json"));
        assert!(store.ensure_initialized().unwrap());
        assert!(!store.ensure_initialized().unwrap());
    }

    #[test]
    fn concurrent_initialization_writes_once() {
        let dir = tempdir().unwrap();
        let store = Arc::new(ConfigStore::new(dir.path().join("iot_config.json")));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.ensure_initialized().unwrap())
            })
            .collect();
        let created = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|created| *created)
            .count();

        assert_eq!(created, 1);
        assert_eq!(&store.load(), store.defaults());
    }

    #[test]
    fn concurrent_saves_never_tear_the_file() {
        let dir = tempdir().unwrap();
        let store = Arc::new(ConfigStore::new(dir.path().join("iot_config.json")));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let mut config = store.load();
                    config.mqtt.port = 1883 + i;
                    store.save(&config).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let text = std::fs::read_to_string(store.path()).unwrap();
        let config: RootConfig = serde_json::from_str(&text).unwrap();
        assert!((1883..1891).contains(&config.mqtt.port));
    }
}
