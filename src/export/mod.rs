//! Export digest reading.
//!
//! The wire format of the raw health export stays behind the
//! [`ExportReader`] trait; what the pipeline consumes is the JSON digest
//! shape defined here.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod aggregate;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to read export '{}': {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse export '{}': {}", .path.display(), .source)]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// One record from the export digest.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthRecord {
    /// Quantity identifier, e.g. `HKQuantityTypeIdentifierStepCount`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "startDate")]
    pub start_date: String,
    /// Number or numeric string; anything else is skipped at aggregation.
    #[serde(default)]
    pub value: Option<Value>,
}

/// Parsed export digest. Every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportData {
    #[serde(default)]
    pub export_date: Option<String>,
    /// Profile attributes (date of birth, sex, blood type, ...).
    #[serde(default)]
    pub me: Map<String, Value>,
    #[serde(default)]
    pub weight_in_kilograms: Option<Value>,
    #[serde(default)]
    pub height_in_centimeters: Option<Value>,
    #[serde(default)]
    pub records: Vec<HealthRecord>,
    #[serde(default)]
    pub activity_summaries: Vec<Value>,
}

impl ExportData {
    /// The digest's export date truncated to `YYYY-MM-DD`, falling back to
    /// today when the digest carries none.
    pub fn export_date(&self) -> String {
        match self.export_date.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                let date_part = raw.split(['T', ' ']).next().unwrap_or(raw);
                date_part.chars().take(10).collect()
            }
            _ => chrono::Local::now().format("%Y-%m-%d").to_string(),
        }
    }

    /// The `me` attribute map with weight/height merged in when present.
    pub fn user_attributes(&self) -> Map<String, Value> {
        let mut attrs = self.me.clone();
        if let Some(w) = &self.weight_in_kilograms {
            attrs.insert("weightInKilograms".to_string(), w.clone());
        }
        if let Some(h) = &self.height_in_centimeters {
            attrs.insert("heightInCentimeters".to_string(), h.clone());
        }
        attrs
    }
}

/// Boundary for the export source format.
///
/// The shipped implementation reads the JSON digest; a parser for the raw
/// XML export would slot in behind the same trait.
pub trait ExportReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<ExportData, ExportError>;
}

/// Reads the JSON export digest from disk.
#[derive(Debug, Clone, Default)]
pub struct JsonExportReader;

impl ExportReader for JsonExportReader {
    fn read(&self, path: &Path) -> Result<ExportData, ExportError> {
        let content = std::fs::read_to_string(path).map_err(|source| ExportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ExportError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
