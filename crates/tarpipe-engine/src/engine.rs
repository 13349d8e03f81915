//! Tar backup engine.
//!
//! Backup is a pull: [`TarEngine::backup_data`] launches the archiver and hands
//! back a [`BackupStream`] the caller drains chunk by chunk. The archiver's exit
//! status is delivered as the final item of that stream.
//!
//! Restore is a push: [`TarEngine::restore_level`] feeds chunks from a
//! [`ChunkSource`] into the archiver's stdin. It is meant to run detached from
//! its caller, so its only outcomes are files under the restore path and at
//! most one fault on the supplied error channel.

use crate::command::{BackupCommandBuilder, CommandSpec, RestoreCommandBuilder};
use crate::command::{OPENSSL_PROGRAM, TAR_PROGRAM};
use crate::compression::Compression;
use crate::error::{EngineError, Result};
use crate::manifest::BackupManifest;
use crate::platform::Platform;
use crate::process::{check_process_output, RunningPipeline, StdinMode};
use crate::storage::{Backup, ChunkSource, Storage};
use camino::{Utf8Path, Utf8PathBuf};
use futures::Stream;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Default chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 20_000_000;

/// Upper bound for the initial allocation of a chunk buffer.
const INITIAL_CHUNK_CAPACITY: usize = 1 << 20;

/// Engine configuration, fixed for a backup/restore session.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Compression used for new backups
    pub compression: Compression,

    /// Key file for `openssl enc`; no encryption when unset
    pub encryption_key: Option<Utf8PathBuf>,

    /// Archive symlink targets instead of the links
    pub dereference_symlinks: bool,

    /// Exclusion patterns passed to the archiver
    pub exclude: Vec<String>,

    /// Host platform
    pub platform: Platform,

    /// Restore reads the whole archive but writes nothing
    pub dry_run: bool,

    /// Maximum chunk size in bytes
    pub chunk_size: usize,

    /// Archiver executable
    pub archiver: String,

    /// Encryption executable
    pub encryptor: String,

    /// Compression forced on restore instead of the manifest's value
    pub restore_compression: Option<Compression>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(Compression::default())
    }
}

impl EngineConfig {
    pub fn new(compression: Compression) -> Self {
        Self {
            compression,
            encryption_key: None,
            dereference_symlinks: false,
            exclude: Vec::new(),
            platform: Platform::current(),
            dry_run: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            archiver: TAR_PROGRAM.to_string(),
            encryptor: OPENSSL_PROGRAM.to_string(),
            restore_compression: None,
        }
    }

    pub fn with_encryption_key(mut self, key_file: impl Into<Utf8PathBuf>) -> Self {
        self.encryption_key = Some(key_file.into());
        self
    }

    pub fn with_dereference(mut self, dereference: bool) -> Self {
        self.dereference_symlinks = dereference;
        self
    }

    pub fn with_exclusions(mut self, patterns: Vec<String>) -> Self {
        self.exclude = patterns;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_archiver(mut self, program: impl Into<String>) -> Self {
        self.archiver = program.into();
        self
    }

    pub fn with_encryptor(mut self, program: impl Into<String>) -> Self {
        self.encryptor = program.into();
        self
    }

    pub fn with_restore_compression(mut self, compression: Compression) -> Self {
        self.restore_compression = Some(compression);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(EngineError::configuration("chunk size must be greater than 0"));
        }
        if self.archiver.trim().is_empty() {
            return Err(EngineError::configuration("archiver program must not be empty"));
        }
        if self.encryptor.trim().is_empty() {
            return Err(EngineError::configuration(
                "encryption program must not be empty",
            ));
        }
        Ok(())
    }
}

/// Streaming backup/restore engine driving tar.
pub struct TarEngine {
    config: EngineConfig,
    storage: Arc<dyn Storage>,
}

impl TarEngine {
    pub fn new(config: EngineConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, storage })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn main_storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Check that the configured programs can be found.
    pub fn preflight(&self) -> Result<()> {
        let mut required = vec![self.config.archiver.as_str()];
        if self.config.encryption_key.is_some() {
            required.push(self.config.encryptor.as_str());
        }
        for program in required {
            match which::which(program) {
                Ok(path) => debug!("Found {} at {}", program, path.display()),
                Err(_) => {
                    return Err(EngineError::configuration(format!(
                        "{} not found in PATH",
                        program
                    )))
                }
            }
        }
        Ok(())
    }

    /// Command that archives `backup_path` using `manifest_path` as the
    /// listed-incremental snapshot file.
    pub fn backup_command(
        &self,
        backup_path: &Utf8Path,
        manifest_path: &Utf8Path,
    ) -> Result<CommandSpec> {
        let mut builder =
            BackupCommandBuilder::new(backup_path, self.config.compression, self.config.platform)
                .with_archiver(&self.config.archiver)
                .with_encryptor(&self.config.encryptor);
        if let Some(key_file) = &self.config.encryption_key {
            builder.set_encryption(key_file);
        }
        if self.config.dereference_symlinks {
            builder.set_dereference(true);
        }
        builder.set_exclude(self.config.exclude.iter().cloned());
        builder.set_listed_incremental(manifest_path);
        builder.build()
    }

    /// Launch the archiver over `backup_path` and return its chunk stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn backup_data(
        &self,
        backup_path: &Utf8Path,
        manifest_path: &Utf8Path,
    ) -> Result<BackupStream> {
        info!("Tar engine backup stream enter");
        let command = self.backup_command(backup_path, manifest_path)?;
        info!("Execution command: {}", command);

        let pipeline = RunningPipeline::spawn(&command, StdinMode::Null)?;
        Ok(BackupStream::new(pipeline, self.config.chunk_size))
    }

    /// Hand the incremental snapshot file of a finished backup to storage.
    pub async fn post_backup(&self, backup: &dyn Backup, manifest_path: &Utf8Path) -> Result<()> {
        self.storage.upload_meta_file(backup, manifest_path).await
    }

    /// Command that restores a backup described by `manifest` into
    /// `restore_path`.
    pub fn restore_command(
        &self,
        restore_path: &Utf8Path,
        manifest: &BackupManifest,
    ) -> Result<CommandSpec> {
        if manifest.encryption && self.config.encryption_key.is_none() {
            return Err(EngineError::configuration(
                "Cannot restore encrypted backup without key",
            ));
        }

        let compression = match self.config.restore_compression {
            Some(compression) => compression,
            None => manifest.compression()?.unwrap_or(self.config.compression),
        };

        let mut builder =
            RestoreCommandBuilder::new(restore_path, compression, self.config.platform)
                .with_archiver(&self.config.archiver)
                .with_encryptor(&self.config.encryptor);
        if let Some(key_file) = &self.config.encryption_key {
            builder.set_encryption(key_file);
        }
        if self.config.dry_run {
            builder.set_dry_run();
        }
        builder.build()
    }

    /// Restore one backup level into `restore_path`.
    ///
    /// Never returns a fault: any failure is sent on `errors`. The sender is
    /// consumed by that send, so at most one fault is ever delivered; on
    /// success it is dropped unsent.
    pub async fn restore_level<S>(
        &self,
        restore_path: &Utf8Path,
        source: S,
        backup: &dyn Backup,
        errors: oneshot::Sender<EngineError>,
    ) where
        S: ChunkSource,
    {
        if let Err(e) = self.try_restore_level(restore_path, source, backup).await {
            error!("Restore of {} failed: {}", backup.name(), e);
            if errors.send(e).is_err() {
                warn!("Error channel closed, restore fault dropped");
            }
        }
    }

    /// Run [`restore_level`](Self::restore_level) on its own task.
    ///
    /// The receiver yields the fault if there was one; a `RecvError` means the
    /// restore succeeded. A restore task that panics or is cancelled is
    /// reported as [`EngineError::Aborted`], never as success.
    pub fn spawn_restore<S>(
        self: &Arc<Self>,
        restore_path: Utf8PathBuf,
        source: S,
        backup: Arc<dyn Backup>,
    ) -> oneshot::Receiver<EngineError>
    where
        S: ChunkSource + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let (level_tx, level_rx) = oneshot::channel();
        let engine = Arc::clone(self);
        let level = tokio::spawn(async move {
            engine
                .restore_level(&restore_path, source, backup.as_ref(), level_tx)
                .await;
        });

        tokio::spawn(async move {
            let fault = match level.await {
                Ok(()) => level_rx.await.ok(),
                Err(e) => {
                    error!("Restore task died: {}", e);
                    Some(EngineError::aborted("Restore", e.to_string()))
                }
            };
            if let Some(fault) = fault {
                if tx.send(fault).is_err() {
                    warn!("Error channel closed, restore fault dropped");
                }
            }
        });
        rx
    }

    async fn try_restore_level<S>(
        &self,
        restore_path: &Utf8Path,
        mut source: S,
        backup: &dyn Backup,
    ) -> Result<()>
    where
        S: ChunkSource,
    {
        let manifest = backup.metadata().await?;
        let command = self.restore_command(restore_path, &manifest)?;
        info!("Execution command: {}", command);

        let mut pipeline = RunningPipeline::spawn(&command, StdinMode::Piped)?;
        pipeline.log_stdout("Restore");

        let transfer = transfer_chunks(&mut source, &mut pipeline).await;
        let outcome = check_process_output(pipeline, "Restore").await;

        match (transfer, outcome) {
            (Ok(bytes), Ok(())) => {
                info!(
                    "Restore of {} complete: {} bytes transmitted",
                    backup.name(),
                    bytes
                );
                Ok(())
            }
            (Err(transfer_err), Ok(())) => Err(transfer_err),
            (transfer, Err(process_err)) => {
                if let Err(transfer_err) = transfer {
                    error!("Restore transfer failed: {}", transfer_err);
                }
                Err(process_err)
            }
        }
    }
}

/// Copy chunks into the pipeline's stdin until the source runs dry.
async fn transfer_chunks<S>(source: &mut S, pipeline: &mut RunningPipeline) -> Result<u64>
where
    S: ChunkSource,
{
    let stdin = pipeline
        .stdin_mut()
        .ok_or_else(|| EngineError::configuration("restore pipeline has no stdin"))?;

    let mut transmitted = 0u64;
    while let Some(chunk) = source.recv_chunk().await? {
        stdin.write_all(&chunk).await?;
        transmitted += chunk.len() as u64;
    }
    stdin.flush().await?;
    info!("Pipe closed as end of data reached. Data transmitted successfully");

    pipeline.close_stdin();
    Ok(transmitted)
}

/// Chunks of a running backup.
///
/// Yields `Ok(chunk)` items of exactly `chunk_size` bytes, except possibly the
/// last. Once the archiver's output ends its exit status is checked; a failure
/// is yielded as a final `Err` item. After that the stream only yields `None`.
///
/// Dropping the stream early kills the archiver; no failure is observed in
/// that case.
pub struct BackupStream {
    pipeline: Option<RunningPipeline>,
    chunk_size: usize,
    chunks: u64,
    bytes: u64,
}

impl BackupStream {
    fn new(pipeline: RunningPipeline, chunk_size: usize) -> Self {
        Self {
            pipeline: Some(pipeline),
            chunk_size,
            chunks: 0,
            bytes: 0,
        }
    }

    /// Read the next chunk.
    pub async fn next_chunk(&mut self) -> Option<Result<Vec<u8>>> {
        let pipeline = self.pipeline.as_mut()?;

        let mut chunk = Vec::with_capacity(self.chunk_size.min(INITIAL_CHUNK_CAPACITY));
        let read = match pipeline.stdout_mut() {
            Some(stdout) => {
                stdout
                    .take(self.chunk_size as u64)
                    .read_to_end(&mut chunk)
                    .await
            }
            None => Ok(0),
        };

        match read {
            Ok(0) => {
                let pipeline = self.pipeline.take()?;
                match check_process_output(pipeline, "Backup").await {
                    Ok(()) => {
                        info!(
                            "Tar engine streaming end: {} chunks, {} bytes",
                            self.chunks, self.bytes
                        );
                        None
                    }
                    Err(e) => Some(Err(e)),
                }
            }
            Ok(n) => {
                self.chunks += 1;
                self.bytes += n as u64;
                debug!("Backup chunk {} ({} bytes)", self.chunks, n);
                Some(Ok(chunk))
            }
            Err(e) => {
                error!("Reading archiver output failed: {}", e);
                if let Some(pipeline) = self.pipeline.take() {
                    pipeline.kill().await;
                }
                Some(Err(e.into()))
            }
        }
    }

    /// Whether the stream has ended
    pub fn is_finished(&self) -> bool {
        self.pipeline.is_none()
    }

    /// Chunks yielded so far
    pub fn chunks_read(&self) -> u64 {
        self.chunks
    }

    /// Bytes yielded so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes
    }

    /// Adapt into a [`futures::Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<u8>>> {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next_chunk().await.map(|item| (item, stream))
        })
    }
}
