//! tarpipe backup engine
//!
//! Streams filesystem backups through an external archiver (GNU tar,
//! optionally piped through `openssl enc`) and feeds stored streams back into
//! it to restore.
//!
//! # Features
//!
//! - **Chunked backup streams**: archiver output is yielded in fixed-size
//!   chunks; the exit status arrives as the final item
//! - **Detached restore**: chunks are pushed into the archiver and any fault is
//!   reported on a one-shot error channel
//! - **Structured commands**: argv pipelines, never shell strings
//! - **Incremental levels**: GNU tar listed-incremental snapshots
//! - **Local store**: directory-backed storage with SHA256 verified replay
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use camino::Utf8Path;
//! use tarpipe_engine::{EngineConfig, LocalStorage, TarEngine};
//!
//! #[tokio::main]
//! async fn main() -> tarpipe_engine::Result<()> {
//!     let storage = Arc::new(LocalStorage::new("/var/backups/tarpipe"));
//!     let engine = TarEngine::new(EngineConfig::default(), storage.clone())?;
//!
//!     let result = storage
//!         .create_backup("nightly", Utf8Path::new("/srv/data"), &engine, None)
//!         .await?;
//!     println!("{} chunks", result.manifest.statistics.chunk_count);
//!
//!     let backup = Arc::new(storage.open("nightly").await?);
//!     let source = storage.chunk_source(&backup).await?;
//!     let engine = Arc::new(engine);
//!     let errors = engine.spawn_restore("/srv/restore".into(), source, backup);
//!     if let Ok(fault) = errors.await {
//!         eprintln!("restore failed: {}", fault);
//!     }
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod compression;
pub mod config;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod platform;
pub mod process;
pub mod storage;

// Re-export commonly used types
pub use command::{BackupCommandBuilder, CommandSpec, RestoreCommandBuilder, Stage};
pub use compression::{Compression, DEFAULT_COMPRESSION};
pub use config::{EngineConfigFile, TarpipeConfig, CONFIG_FILE_NAMES};
pub use engine::{BackupStream, EngineConfig, TarEngine, DEFAULT_CHUNK_SIZE};
pub use error::{EngineError, Result};
pub use manifest::{
    BackupManifest, BackupStatistics, ChecksumInfo, MANIFEST_FILENAME, MANIFEST_VERSION,
};
pub use platform::Platform;
pub use process::{check_process_output, ProcessOutcome, RunningPipeline, StageOutcome};
pub use storage::{
    Backup, BackupResult, ChunkSource, LocalBackup, LocalChunkSource, LocalStorage, Storage,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
