use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use std::sync::Mutex;
use tarpipe_engine::{Backup, BackupManifest, Result, Storage};

/// Storage that only records snapshot uploads
#[derive(Default)]
pub struct RecordingStorage {
    pub uploads: Mutex<Vec<(String, Utf8PathBuf)>>,
}

#[async_trait]
impl Storage for RecordingStorage {
    async fn upload_meta_file(&self, backup: &dyn Backup, manifest_path: &Utf8Path) -> Result<()> {
        self.uploads
            .lock()
            .unwrap()
            .push((backup.name().to_string(), manifest_path.to_owned()));
        Ok(())
    }
}

/// Backup whose manifest lives in memory
pub struct TestBackup {
    pub name: String,
    pub manifest: BackupManifest,
}

impl TestBackup {
    pub fn new(compression: &str, encryption: bool) -> Self {
        let manifest = BackupManifest::from_json(&format!(
            r#"{{"encryption": {}, "compression": "{}"}}"#,
            encryption, compression
        ))
        .unwrap();
        Self {
            name: "test-backup".to_string(),
            manifest,
        }
    }
}

#[async_trait]
impl Backup for TestBackup {
    fn name(&self) -> &str {
        &self.name
    }

    async fn metadata(&self) -> Result<BackupManifest> {
        Ok(self.manifest.clone())
    }
}
