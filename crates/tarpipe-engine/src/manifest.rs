//! Backup manifest format and metadata.
//!
//! The manifest describes one backup level: how its stream was produced
//! (compression, encryption) and where it sits in an incremental chain. Restore
//! reads it once before launching the archiver.

use crate::compression::Compression;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version of the backup manifest format.
pub const MANIFEST_VERSION: &str = "1.0.0";

/// Name of the manifest file stored next to the chunks.
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Metadata of a stored backup.
///
/// Every field falls back to a default when deserializing, so manifests
/// written by other tooling can still drive a restore. A missing
/// `compression` defers to the restoring engine's compression and a missing
/// `encryption` means the stream is plain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    /// Manifest format version
    #[serde(default = "default_version")]
    pub version: String,

    /// Name of the backup this manifest describes
    #[serde(default)]
    pub backup_name: String,

    /// When the backup was created
    #[serde(default)]
    pub created_at: DateTime<Utc>,

    /// What created this backup
    #[serde(default)]
    pub created_by: String,

    /// Directory that was archived
    #[serde(default)]
    pub source_path: String,

    /// Compression algorithm used, `None` if unrecorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,

    /// Whether the stream was encrypted
    #[serde(default)]
    pub encryption: bool,

    /// Incremental level (0 = full backup)
    #[serde(default)]
    pub level: u32,

    /// Backup this level is incremental to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Stream statistics
    #[serde(default)]
    pub statistics: BackupStatistics,

    /// Checksum of the concatenated stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<ChecksumInfo>,
}

fn default_version() -> String {
    MANIFEST_VERSION.to_string()
}

/// Checksum information for integrity verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumInfo {
    /// Hash algorithm (sha256)
    pub algorithm: String,

    /// Hex-encoded checksum value
    pub value: String,
}

/// Statistics about the produced stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupStatistics {
    /// Number of chunks written
    pub chunk_count: u64,

    /// Total stream size in bytes
    pub size_bytes: u64,

    /// Duration of the backup in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

impl BackupManifest {
    /// Creates a manifest for a full (level 0) backup.
    pub fn new(
        backup_name: impl Into<String>,
        source_path: impl Into<String>,
        compression: Compression,
        encryption: bool,
    ) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            backup_name: backup_name.into(),
            created_at: Utc::now(),
            created_by: format!("tarpipe v{}", env!("CARGO_PKG_VERSION")),
            source_path: source_path.into(),
            compression: Some(compression.as_str().to_string()),
            encryption,
            level: 0,
            parent: None,
            statistics: BackupStatistics::default(),
            checksum: None,
        }
    }

    /// Marks the manifest as an incremental level on top of `parent`.
    pub fn with_parent(mut self, parent: impl Into<String>, parent_level: u32) -> Self {
        self.parent = Some(parent.into());
        self.level = parent_level + 1;
        self
    }

    pub fn with_statistics(mut self, statistics: BackupStatistics) -> Self {
        self.statistics = statistics;
        self
    }

    pub fn with_checksum(mut self, checksum: ChecksumInfo) -> Self {
        self.checksum = Some(checksum);
        self
    }

    /// Parsed compression algorithm, `None` if the manifest does not record one.
    pub fn compression(&self) -> Result<Option<Compression>> {
        self.compression.as_deref().map(str::parse).transpose()
    }

    /// Serializes the manifest to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserializes a manifest from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Validates that the manifest can be restored by this version.
    pub fn validate(&self) -> Result<()> {
        if self.version != MANIFEST_VERSION {
            return Err(EngineError::configuration(format!(
                "Incompatible manifest version: {} (expected {})",
                self.version, MANIFEST_VERSION
            )));
        }

        if let Some(checksum) = &self.checksum {
            if checksum.algorithm != "sha256" {
                return Err(EngineError::configuration(format!(
                    "Unsupported checksum algorithm: {}",
                    checksum.algorithm
                )));
            }
        }

        self.compression()?;
        Ok(())
    }
}

impl BackupStatistics {
    pub fn new(chunk_count: u64, size_bytes: u64) -> Self {
        Self {
            chunk_count,
            size_bytes,
            duration_seconds: None,
        }
    }

    /// Sets the backup duration.
    pub fn with_duration(mut self, duration_seconds: f64) -> Self {
        self.duration_seconds = Some(duration_seconds);
        self
    }

    /// Returns a human-readable size string.
    pub fn human_readable_size(&self) -> String {
        human_bytes(self.size_bytes)
    }
}

/// Formats bytes as a human-readable string.
fn human_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_creation() {
        let manifest = BackupManifest::new("nightly", "/srv/data", Compression::Xz, true);

        assert_eq!(manifest.version, MANIFEST_VERSION);
        assert_eq!(manifest.compression.as_deref(), Some("xz"));
        assert!(manifest.encryption);
        assert_eq!(manifest.level, 0);
        assert!(manifest.parent.is_none());
        assert!(manifest.created_by.starts_with("tarpipe v"));
    }

    #[test]
    fn test_manifest_with_parent_bumps_level() {
        let manifest = BackupManifest::new("mon", "/srv", Compression::Gzip, false)
            .with_parent("sun", 2);
        assert_eq!(manifest.parent.as_deref(), Some("sun"));
        assert_eq!(manifest.level, 3);
    }

    #[test]
    fn test_manifest_serialization() {
        let manifest = BackupManifest::new("nightly", "/srv/data", Compression::Gzip, false)
            .with_statistics(BackupStatistics::new(3, 45_000_000).with_duration(1.5))
            .with_checksum(ChecksumInfo {
                algorithm: "sha256".to_string(),
                value: "abc123".to_string(),
            });

        let json = manifest.to_json().unwrap();
        assert!(json.contains("\"encryption\": false"));
        assert!(json.contains("\"compression\": \"gzip\""));
        assert!(!json.contains("parent"));

        let deserialized = BackupManifest::from_json(&json).unwrap();
        assert_eq!(deserialized.backup_name, "nightly");
        assert_eq!(deserialized.statistics.chunk_count, 3);
        assert_eq!(deserialized.checksum, manifest.checksum);
    }

    #[test]
    fn test_minimal_manifest() {
        let manifest =
            BackupManifest::from_json(r#"{"encryption": true, "compression": "bzip2"}"#).unwrap();
        assert!(manifest.encryption);
        assert_eq!(manifest.compression().unwrap(), Some(Compression::Bzip2));
        assert_eq!(manifest.version, MANIFEST_VERSION);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_manifest_missing_stream_fields_default() {
        let manifest = BackupManifest::from_json(r#"{"compression": "gzip"}"#).unwrap();
        assert!(!manifest.encryption);

        let manifest = BackupManifest::from_json(r#"{"encryption": true}"#).unwrap();
        assert!(manifest.compression.is_none());
        assert_eq!(manifest.compression().unwrap(), None);
        assert!(manifest.validate().is_ok());

        let manifest = BackupManifest::from_json("{}").unwrap();
        assert!(!manifest.encryption);
        assert!(manifest.compression.is_none());
        assert!(!manifest.to_json().unwrap().contains("compression"));
    }

    #[test]
    fn test_manifest_validation() {
        let mut manifest = BackupManifest::new("n", "/srv", Compression::Gzip, false);
        assert!(manifest.validate().is_ok());

        manifest.version = "2.0.0".to_string();
        assert!(manifest.validate().is_err());
        manifest.version = MANIFEST_VERSION.to_string();

        manifest.compression = Some("lz4".to_string());
        assert!(manifest.validate().is_err());
        manifest.compression = Some("gzip".to_string());

        manifest.checksum = Some(ChecksumInfo {
            algorithm: "md5".to_string(),
            value: "x".to_string(),
        });
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(1024), "1.00 KB");
        assert_eq!(human_bytes(20_000_000), "19.07 MB");
        assert_eq!(human_bytes(1_073_741_824), "1.00 GB");
    }
}
