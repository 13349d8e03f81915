//! Directory-backed backup store.
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/
//!   <backup-name>/
//!     manifest.json
//!     snapshot.incremental
//!     chunks/
//!       00000000
//!       00000001
//!   .work/
//!     <backup-name>.incremental
//! ```
//!
//! The listed-incremental snapshot tar updates while a backup runs lives under
//! `.work/` until the stream has been fully stored, then `post_backup` copies it
//! into the backup directory. An incremental backup starts from a copy of its
//! parent's snapshot.

use crate::engine::TarEngine;
use crate::error::{EngineError, Result};
use crate::manifest::{BackupManifest, BackupStatistics, ChecksumInfo, MANIFEST_FILENAME};
use crate::storage::{Backup, ChunkSource, Storage};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::io::ErrorKind;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Name of the stored listed-incremental snapshot file.
pub const SNAPSHOT_FILENAME: &str = "snapshot.incremental";

/// Directory holding the chunk files of a backup.
pub const CHUNKS_DIR: &str = "chunks";

const WORK_DIR: &str = ".work";

/// Outcome of [`LocalStorage::create_backup`].
#[derive(Debug, Clone)]
pub struct BackupResult {
    pub backup: LocalBackup,
    pub manifest: BackupManifest,
}

/// Backup store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: Utf8PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn backup_dir(&self, name: &str) -> Utf8PathBuf {
        self.root.join(name)
    }

    /// Stored snapshot file of a finished backup.
    pub fn snapshot_path(&self, name: &str) -> Utf8PathBuf {
        self.backup_dir(name).join(SNAPSHOT_FILENAME)
    }

    fn work_snapshot_path(&self, name: &str) -> Utf8PathBuf {
        self.root
            .join(WORK_DIR)
            .join(format!("{}.incremental", name))
    }

    /// Run a backup of `source_path` and store it as `name`.
    ///
    /// With a `parent`, the backup is an incremental level on top of it: tar
    /// starts from the parent's snapshot and only archives what changed since.
    /// A failed backup leaves nothing behind.
    pub async fn create_backup(
        &self,
        name: &str,
        source_path: &Utf8Path,
        engine: &TarEngine,
        parent: Option<&str>,
    ) -> Result<BackupResult> {
        validate_backup_name(name)?;

        let dir = self.backup_dir(name);
        if tokio::fs::try_exists(&dir).await? {
            return Err(EngineError::storage(format!(
                "Backup already exists: {}",
                name
            )));
        }

        let parent = match parent {
            Some(parent_name) => {
                let backup = self.open(parent_name).await?;
                let manifest = backup.metadata().await?;
                Some((backup, manifest.level))
            }
            None => None,
        };

        let work = self.work_snapshot_path(name);
        tokio::fs::create_dir_all(self.root.join(WORK_DIR)).await?;
        match &parent {
            Some((backup, _)) => {
                tokio::fs::copy(backup.snapshot_path(), &work)
                    .await
                    .map_err(|e| {
                        EngineError::storage(format!(
                            "Cannot read snapshot of parent backup {}: {}",
                            backup.name(),
                            e
                        ))
                    })?;
            }
            None => remove_if_exists(&work).await?,
        }

        let result = self
            .store_backup(name, source_path, engine, parent.as_ref(), &work)
            .await;

        if let Err(e) = remove_if_exists(&work).await {
            warn!("Failed to remove working snapshot {}: {}", work, e);
        }

        if result.is_err() {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Failed to clean up incomplete backup {}: {}", dir, e);
                }
            }
        }

        result
    }

    async fn store_backup(
        &self,
        name: &str,
        source_path: &Utf8Path,
        engine: &TarEngine,
        parent: Option<&(LocalBackup, u32)>,
        work_snapshot: &Utf8Path,
    ) -> Result<BackupResult> {
        let start = Instant::now();
        let backup = LocalBackup::new(name, self.backup_dir(name));
        tokio::fs::create_dir_all(backup.chunks_dir()).await?;

        let mut stream = engine.backup_data(source_path, work_snapshot)?;
        let mut hasher = Sha256::new();
        let mut chunk_count = 0u64;
        let mut size_bytes = 0u64;

        while let Some(item) = stream.next_chunk().await {
            let chunk = item?;
            hasher.update(&chunk);
            tokio::fs::write(backup.chunk_path(chunk_count), &chunk).await?;
            chunk_count += 1;
            size_bytes += chunk.len() as u64;
        }

        let config = engine.config();
        let mut manifest = BackupManifest::new(
            name,
            source_path.as_str(),
            config.compression,
            config.encryption_key.is_some(),
        );
        if let Some((parent, level)) = parent {
            manifest = manifest.with_parent(parent.name(), *level);
        }
        let manifest = manifest
            .with_statistics(
                BackupStatistics::new(chunk_count, size_bytes)
                    .with_duration(start.elapsed().as_secs_f64()),
            )
            .with_checksum(ChecksumInfo {
                algorithm: "sha256".to_string(),
                value: format!("{:x}", hasher.finalize()),
            });

        tokio::fs::write(backup.manifest_path(), manifest.to_json()?).await?;
        engine.post_backup(&backup, work_snapshot).await?;

        info!(
            "Stored backup {} (level {}): {} chunks, {}",
            name,
            manifest.level,
            chunk_count,
            manifest.statistics.human_readable_size()
        );

        Ok(BackupResult { backup, manifest })
    }

    /// Open a stored backup.
    pub async fn open(&self, name: &str) -> Result<LocalBackup> {
        validate_backup_name(name)?;
        let backup = LocalBackup::new(name, self.backup_dir(name));
        if !tokio::fs::try_exists(backup.manifest_path()).await? {
            return Err(EngineError::storage(format!("Backup not found: {}", name)));
        }
        Ok(backup)
    }

    /// Manifests of every stored backup, oldest first.
    pub async fn list(&self) -> Result<Vec<BackupManifest>> {
        let mut manifests = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(manifests),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }

            match LocalBackup::new(&name, self.backup_dir(&name)).metadata().await {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => warn!("Skipping {}: {}", name, e),
            }
        }

        manifests.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.backup_name.cmp(&b.backup_name))
        });
        Ok(manifests)
    }

    /// Backups needed to restore `name`, oldest first: the full backup, then
    /// each incremental level up to and including `name`.
    pub async fn chain(&self, name: &str) -> Result<Vec<LocalBackup>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(name.to_string());

        while let Some(link) = current.take() {
            if !seen.insert(link.clone()) {
                return Err(EngineError::storage(format!(
                    "Backup chain of {} loops back to {}",
                    name, link
                )));
            }
            let backup = self.open(&link).await?;
            current = backup.metadata().await?.parent;
            chain.push(backup);
        }

        chain.reverse();
        Ok(chain)
    }

    /// Chunk source replaying a stored backup in order.
    pub async fn chunk_source(&self, backup: &LocalBackup) -> Result<LocalChunkSource> {
        let manifest = backup.metadata().await?;

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(backup.chunks_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Ok(name) = entry.file_name().into_string() {
                files.push(backup.chunks_dir().join(name));
            }
        }
        files.sort();

        if files.len() as u64 != manifest.statistics.chunk_count {
            return Err(EngineError::storage(format!(
                "Backup {} has {} chunks, manifest lists {}",
                backup.name(),
                files.len(),
                manifest.statistics.chunk_count
            )));
        }

        Ok(LocalChunkSource {
            files: files.into(),
            hasher: Sha256::new(),
            expected: manifest.checksum.map(|c| c.value),
            finished: false,
        })
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload_meta_file(&self, backup: &dyn Backup, manifest_path: &Utf8Path) -> Result<()> {
        let dest = self.snapshot_path(backup.name());
        tokio::fs::copy(manifest_path, &dest).await.map_err(|e| {
            EngineError::storage(format!(
                "Failed to store snapshot {} for {}: {}",
                manifest_path,
                backup.name(),
                e
            ))
        })?;
        debug!("Stored snapshot of {} at {}", backup.name(), dest);
        Ok(())
    }
}

/// A backup stored by [`LocalStorage`].
#[derive(Debug, Clone)]
pub struct LocalBackup {
    name: String,
    dir: Utf8PathBuf,
}

impl LocalBackup {
    fn new(name: impl Into<String>, dir: Utf8PathBuf) -> Self {
        Self {
            name: name.into(),
            dir,
        }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn manifest_path(&self) -> Utf8PathBuf {
        self.dir.join(MANIFEST_FILENAME)
    }

    pub fn snapshot_path(&self) -> Utf8PathBuf {
        self.dir.join(SNAPSHOT_FILENAME)
    }

    pub fn chunks_dir(&self) -> Utf8PathBuf {
        self.dir.join(CHUNKS_DIR)
    }

    fn chunk_path(&self, index: u64) -> Utf8PathBuf {
        self.chunks_dir().join(format!("{:08}", index))
    }
}

#[async_trait]
impl Backup for LocalBackup {
    fn name(&self) -> &str {
        &self.name
    }

    async fn metadata(&self) -> Result<BackupManifest> {
        let json = match tokio::fs::read_to_string(self.manifest_path()).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(EngineError::storage(format!(
                    "Backup not found: {}",
                    self.name
                )))
            }
            Err(e) => return Err(e.into()),
        };
        let manifest = BackupManifest::from_json(&json)?;
        manifest.validate()?;
        Ok(manifest)
    }
}

/// Reads the chunk files of a [`LocalBackup`] in order.
///
/// Once every chunk has been handed out the SHA-256 of the replayed stream is
/// compared with the manifest; a mismatch is reported instead of end of data.
pub struct LocalChunkSource {
    files: VecDeque<Utf8PathBuf>,
    hasher: Sha256,
    expected: Option<String>,
    finished: bool,
}

#[async_trait]
impl ChunkSource for LocalChunkSource {
    async fn recv_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if let Some(path) = self.files.pop_front() {
            let chunk = tokio::fs::read(&path)
                .await
                .map_err(|e| EngineError::source_failed(format!("{}: {}", path, e)))?;
            self.hasher.update(&chunk);
            return Ok(Some(chunk));
        }

        if !self.finished {
            self.finished = true;
            if let Some(expected) = &self.expected {
                let actual = format!("{:x}", self.hasher.finalize_reset());
                if &actual != expected {
                    return Err(EngineError::source_failed(format!(
                        "Checksum mismatch: expected {}, got {}",
                        expected, actual
                    )));
                }
            }
        }
        Ok(None)
    }
}

fn validate_backup_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(EngineError::invalid_argument("backup name", "must not be empty"));
    }
    if name.starts_with('.') {
        return Err(EngineError::invalid_argument(
            "backup name",
            "must not start with '.'",
        ));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(EngineError::invalid_argument(
            "backup name",
            "must not contain path separators",
        ));
    }
    Ok(())
}

async fn remove_if_exists(path: &Utf8Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_name_validation() {
        assert!(validate_backup_name("nightly-2026-10-18").is_ok());
        assert!(validate_backup_name("").is_err());
        assert!(validate_backup_name(".work").is_err());
        assert!(validate_backup_name("..").is_err());
        assert!(validate_backup_name("a/b").is_err());
        assert!(validate_backup_name("a\\b").is_err());
    }

    #[test]
    fn test_layout_paths() {
        let storage = LocalStorage::new("/var/backups");
        assert_eq!(
            storage.snapshot_path("mon"),
            Utf8PathBuf::from("/var/backups/mon/snapshot.incremental")
        );

        let backup = LocalBackup::new("mon", storage.backup_dir("mon"));
        assert_eq!(
            backup.chunk_path(3),
            Utf8PathBuf::from("/var/backups/mon/chunks/00000003")
        );
        assert_eq!(
            backup.manifest_path(),
            Utf8PathBuf::from("/var/backups/mon/manifest.json")
        );
    }

    #[tokio::test]
    async fn test_list_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().join("absent")).unwrap();
        assert!(LocalStorage::new(root).list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_unknown_backup() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(Utf8PathBuf::from_path_buf(dir.path().into()).unwrap());
        let err = storage.open("missing").await.unwrap_err();
        assert!(matches!(err, EngineError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_chunk_source_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().into()).unwrap();
        let storage = LocalStorage::new(root.clone());

        let backup = LocalBackup::new("b", storage.backup_dir("b"));
        tokio::fs::create_dir_all(backup.chunks_dir()).await.unwrap();
        tokio::fs::write(backup.chunk_path(0), b"hello ").await.unwrap();
        tokio::fs::write(backup.chunk_path(1), b"world").await.unwrap();

        let manifest = BackupManifest::new("b", "/src", Default::default(), false)
            .with_statistics(BackupStatistics::new(2, 11))
            .with_checksum(ChecksumInfo {
                algorithm: "sha256".to_string(),
                value: format!("{:x}", Sha256::digest(b"hello world")),
            });
        tokio::fs::write(backup.manifest_path(), manifest.to_json().unwrap())
            .await
            .unwrap();

        let mut source = storage.chunk_source(&backup).await.unwrap();
        assert_eq!(source.recv_chunk().await.unwrap(), Some(b"hello ".to_vec()));
        assert_eq!(source.recv_chunk().await.unwrap(), Some(b"world".to_vec()));
        assert_eq!(source.recv_chunk().await.unwrap(), None);
        assert_eq!(source.recv_chunk().await.unwrap(), None);

        tokio::fs::write(backup.chunk_path(1), b"WORLD").await.unwrap();
        let mut source = storage.chunk_source(&backup).await.unwrap();
        source.recv_chunk().await.unwrap();
        source.recv_chunk().await.unwrap();
        let err = source.recv_chunk().await.unwrap_err();
        assert!(err.to_string().contains("Checksum mismatch"));
    }

    #[tokio::test]
    async fn test_chunk_source_rejects_missing_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(Utf8PathBuf::from_path_buf(dir.path().into()).unwrap());

        let backup = LocalBackup::new("b", storage.backup_dir("b"));
        tokio::fs::create_dir_all(backup.chunks_dir()).await.unwrap();
        tokio::fs::write(backup.chunk_path(0), b"only").await.unwrap();
        let manifest = BackupManifest::new("b", "/src", Default::default(), false)
            .with_statistics(BackupStatistics::new(2, 8));
        tokio::fs::write(backup.manifest_path(), manifest.to_json().unwrap())
            .await
            .unwrap();

        let err = storage.chunk_source(&backup).await.err().unwrap();
        assert!(matches!(err, EngineError::Storage { .. }));
    }

    #[cfg(unix)]
    mod with_archiver {
        use super::super::*;
        use crate::engine::EngineConfig;
        use std::os::unix::fs::PermissionsExt;
        use std::sync::Arc;
        use tempfile::TempDir;

        /// Stand-in archiver: appends a line to the snapshot file it is given
        /// and emits a fixed payload.
        const FAKE_TAR: &str = r#"#!/bin/sh
for arg in "$@"; do
  case "$arg" in
    --listed-incremental=*) echo run >> "${arg#--listed-incremental=}" ;;
  esac
done
printf 'abcdefghij'
"#;

        fn setup(script: &str) -> (TempDir, Arc<LocalStorage>, TarEngine) {
            let dir = TempDir::new().unwrap();
            let archiver = dir.path().join("fake-tar");
            std::fs::write(&archiver, script).unwrap();
            std::fs::set_permissions(&archiver, std::fs::Permissions::from_mode(0o755)).unwrap();

            let root = Utf8PathBuf::from_path_buf(dir.path().join("store")).unwrap();
            let storage = Arc::new(LocalStorage::new(root));
            let engine = TarEngine::new(
                EngineConfig::default()
                    .with_archiver(archiver.to_string_lossy())
                    .with_chunk_size(4),
                storage.clone(),
            )
            .unwrap();
            (dir, storage, engine)
        }

        #[tokio::test]
        async fn test_create_backup_writes_layout() {
            let (_dir, storage, engine) = setup(FAKE_TAR);

            let result = storage
                .create_backup("full", Utf8Path::new("/srv"), &engine, None)
                .await
                .unwrap();

            assert_eq!(result.manifest.level, 0);
            assert_eq!(result.manifest.statistics.chunk_count, 3);
            assert_eq!(result.manifest.statistics.size_bytes, 10);
            assert_eq!(result.manifest.compression.as_deref(), Some("gzip"));
            assert!(!result.manifest.encryption);

            let dir = storage.backup_dir("full");
            assert!(dir.join(MANIFEST_FILENAME).exists());
            assert_eq!(
                std::fs::read_to_string(dir.join(SNAPSHOT_FILENAME)).unwrap(),
                "run\n"
            );
            assert_eq!(std::fs::read(dir.join("chunks/00000002")).unwrap(), b"ij");
            assert!(!storage.work_snapshot_path("full").exists());

            let backup = storage.open("full").await.unwrap();
            let mut source = storage.chunk_source(&backup).await.unwrap();
            let mut replayed = Vec::new();
            while let Some(chunk) = source.recv_chunk().await.unwrap() {
                replayed.extend(chunk);
            }
            assert_eq!(replayed, b"abcdefghij");
        }

        #[tokio::test]
        async fn test_incremental_backup_starts_from_parent_snapshot() {
            let (_dir, storage, engine) = setup(FAKE_TAR);

            storage
                .create_backup("sun", Utf8Path::new("/srv"), &engine, None)
                .await
                .unwrap();
            let mon = storage
                .create_backup("mon", Utf8Path::new("/srv"), &engine, Some("sun"))
                .await
                .unwrap();

            assert_eq!(mon.manifest.level, 1);
            assert_eq!(mon.manifest.parent.as_deref(), Some("sun"));
            assert_eq!(
                std::fs::read_to_string(storage.snapshot_path("mon")).unwrap(),
                "run\nrun\n"
            );
            // the parent's snapshot is left untouched
            assert_eq!(
                std::fs::read_to_string(storage.snapshot_path("sun")).unwrap(),
                "run\n"
            );

            let chain: Vec<String> = storage
                .chain("mon")
                .await
                .unwrap()
                .iter()
                .map(|b| b.name().to_string())
                .collect();
            assert_eq!(chain, vec!["sun", "mon"]);

            let listed: Vec<String> = storage
                .list()
                .await
                .unwrap()
                .into_iter()
                .map(|m| m.backup_name)
                .collect();
            assert_eq!(listed, vec!["sun", "mon"]);
        }

        #[tokio::test]
        async fn test_duplicate_backup_name_rejected() {
            let (_dir, storage, engine) = setup(FAKE_TAR);
            storage
                .create_backup("once", Utf8Path::new("/srv"), &engine, None)
                .await
                .unwrap();
            let err = storage
                .create_backup("once", Utf8Path::new("/srv"), &engine, None)
                .await
                .unwrap_err();
            assert!(err.to_string().contains("already exists"));
        }

        #[tokio::test]
        async fn test_failed_backup_leaves_nothing_behind() {
            let (_dir, storage, engine) =
                setup("#!/bin/sh\nprintf 'partial'\necho 'tar: /srv: Cannot open' >&2\nexit 2\n");

            let err = storage
                .create_backup("broken", Utf8Path::new("/srv"), &engine, None)
                .await
                .unwrap_err();

            assert_eq!(err.exit_code(), Some(2));
            assert!(!storage.backup_dir("broken").exists());
            assert!(!storage.work_snapshot_path("broken").exists());
            assert!(storage.list().await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_unknown_parent_rejected() {
            let (_dir, storage, engine) = setup(FAKE_TAR);
            let err = storage
                .create_backup("mon", Utf8Path::new("/srv"), &engine, Some("sun"))
                .await
                .unwrap_err();
            assert!(err.to_string().contains("Backup not found"));
            assert!(!storage.backup_dir("mon").exists());
        }
    }
}
