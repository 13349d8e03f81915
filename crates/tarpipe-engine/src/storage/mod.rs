//! Collaborator interfaces around the engine.
//!
//! The engine only produces and consumes chunks. Where chunks and manifests
//! live, and how chunks travel back during a restore, is decided by
//! implementations of these traits.

use crate::error::{EngineError, Result};
use crate::manifest::BackupManifest;
use async_trait::async_trait;
use camino::Utf8Path;
use tokio::sync::mpsc;

pub mod local;

pub use local::{BackupResult, LocalBackup, LocalChunkSource, LocalStorage};

/// A stored backup.
#[async_trait]
pub trait Backup: Send + Sync {
    /// Identifier of the backup within its storage
    fn name(&self) -> &str;

    /// Fetch the manifest describing this backup
    async fn metadata(&self) -> Result<BackupManifest>;
}

/// Persistent storage for backups.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store the incremental snapshot file produced while backing up `backup`.
    async fn upload_meta_file(&self, backup: &dyn Backup, manifest_path: &Utf8Path) -> Result<()>;
}

/// Blocking-receive source of chunks for a restore.
///
/// `Ok(None)` signals end of data and is the normal way for a transfer to
/// finish. `Err` is a fault.
#[async_trait]
pub trait ChunkSource: Send {
    async fn recv_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

#[async_trait]
impl ChunkSource for mpsc::Receiver<Vec<u8>> {
    async fn recv_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.recv().await)
    }
}

/// Lets a producer report its own failure in-band.
#[async_trait]
impl ChunkSource for mpsc::Receiver<Result<Vec<u8>>> {
    async fn recv_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self.recv().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(EngineError::source_failed(e.to_string())),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<S: ChunkSource + ?Sized> ChunkSource for Box<S> {
    async fn recv_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        (**self).recv_chunk().await
    }
}
