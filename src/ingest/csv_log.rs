//! Append-only local CSV log.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::payload::SensorReading;
use super::IngestError;

pub const HEADER: [&str; 6] = [
    "Timestamp",
    "Device_ID",
    "Ammonia_PPM",
    "Temperature",
    "Humidity",
    "Ro_Value",
];

pub struct CsvLog {
    path: PathBuf,
    // header check and append happen as one step
    lock: Mutex<()>,
}

impl CsvLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row, writing the header first if the file does not exist.
    pub fn append(&self, reading: &SensorReading) -> Result<(), IngestError> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.write_row(reading).map_err(|source| IngestError::LocalLog {
            path: self.path.clone(),
            source,
        })
    }

    fn write_row(&self, reading: &SensorReading) -> Result<(), csv::Error> {
        let needs_header = !self.path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

        if needs_header {
            writer.write_record(HEADER)?;
        }
        writer.write_record([
            reading.received_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            reading.device_id.clone(),
            number_cell(reading.value),
            number_cell(reading.temperature),
            number_cell(reading.humidity),
            number_cell(reading.calibration),
        ])?;
        writer.flush()?;
        Ok(())
    }
}

/// Debug formatting keeps the trailing `.0` on whole numbers.
fn number_cell(value: f64) -> String {
    format!("{:?}", value)
}
