//! Backup command

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use std::sync::Arc;
use tarpipe_engine::{Compression, LocalStorage, TarEngine};

use crate::output;

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Directory to back up
    pub source: Utf8PathBuf,

    /// Backup name (defaults to a UTC timestamp)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Make an incremental backup on top of this one
    #[arg(short, long)]
    pub parent: Option<String>,

    /// Storage directory (overrides the config file)
    #[arg(short, long)]
    pub storage: Option<Utf8PathBuf>,

    /// Compression algorithm (gzip, bzip2, xz)
    #[arg(long)]
    pub compression: Option<Compression>,

    /// Additional exclude patterns
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Archive symlink targets instead of the links
    #[arg(long)]
    pub dereference: bool,

    /// Encrypt with openssl using this key file
    #[arg(long)]
    pub key_file: Option<Utf8PathBuf>,

    /// Chunk size in bytes
    #[arg(long)]
    pub chunk_size: Option<usize>,
}

pub async fn run(args: BackupArgs, config: Option<&Utf8Path>) -> Result<()> {
    output::header("Backup");

    let settings = super::load_settings(config, args.storage.clone())?;
    let mut engine_config = settings.to_engine_config();
    if let Some(compression) = args.compression {
        engine_config.compression = compression;
    }
    engine_config.exclude.extend(args.exclude.iter().cloned());
    if args.dereference {
        engine_config.dereference_symlinks = true;
    }
    if let Some(key_file) = &args.key_file {
        engine_config.encryption_key = Some(key_file.clone());
    }
    if let Some(chunk_size) = args.chunk_size {
        engine_config.chunk_size = chunk_size;
    }

    let source = std::fs::canonicalize(&args.source)
        .with_context(|| format!("Cannot access {}", args.source))?;
    let source = Utf8PathBuf::try_from(source).context("Source path is not valid UTF-8")?;
    if !source.is_dir() {
        anyhow::bail!("{} is not a directory", source);
    }

    let name = args
        .name
        .clone()
        .unwrap_or_else(|| chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string());

    output::kv("Source", source.as_str());
    output::kv("Name", &name);
    output::kv("Storage", settings.storage.as_str());
    output::kv("Compression", engine_config.compression.as_str());
    if let Some(parent) = &args.parent {
        output::kv("Incremental to", parent);
    }
    if engine_config.encryption_key.is_some() {
        output::kv("Encryption", "Enabled (openssl)");
    }
    println!();

    let storage = Arc::new(LocalStorage::new(settings.storage.clone()));
    let engine = TarEngine::new(engine_config, storage.clone())?;
    engine.preflight()?;

    let spinner = output::spinner("Archiving...");
    let result = storage
        .create_backup(&name, &source, &engine, args.parent.as_deref())
        .await;
    spinner.finish_and_clear();
    let result = result.with_context(|| format!("Backup {} failed", name))?;

    output::success(&format!("Backup {} stored", name));
    output::kv("Level", &result.manifest.level.to_string());
    output::statistics(&result.manifest.statistics);
    output::kv("Location", result.backup.dir().as_str());

    Ok(())
}
