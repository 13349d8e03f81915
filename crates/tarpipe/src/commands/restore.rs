//! Restore command
//!
//! Replays a stored backup chain into the archiver, oldest level first.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use std::sync::Arc;
use tarpipe_engine::{Backup, Compression, LocalBackup, LocalStorage, TarEngine};

use crate::output;

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Name of the backup to restore
    pub name: String,

    /// Target directory; should be empty, as incremental levels delete files
    /// that were absent when they were taken
    #[arg(short = 'd', long, required_unless_present = "dry_run")]
    pub target: Option<Utf8PathBuf>,

    /// Read the whole archive and list it without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Restore only this level, not its parents
    #[arg(long)]
    pub level_only: bool,

    /// Storage directory (overrides the config file)
    #[arg(short, long)]
    pub storage: Option<Utf8PathBuf>,

    /// Decryption key file
    #[arg(long)]
    pub key_file: Option<Utf8PathBuf>,

    /// Assume this compression instead of the one in the manifest
    #[arg(long)]
    pub compression: Option<Compression>,
}

pub async fn run(args: RestoreArgs, config: Option<&Utf8Path>) -> Result<()> {
    output::header("Restore");

    let settings = super::load_settings(config, args.storage.clone())?;
    let mut engine_config = settings.to_engine_config().with_dry_run(args.dry_run);
    if let Some(key_file) = &args.key_file {
        engine_config.encryption_key = Some(key_file.clone());
    }
    if let Some(compression) = args.compression {
        engine_config.restore_compression = Some(compression);
    }

    let storage = Arc::new(LocalStorage::new(settings.storage.clone()));
    let engine = Arc::new(TarEngine::new(engine_config, storage.clone())?);
    engine.preflight()?;

    let levels = if args.level_only {
        vec![storage.open(&args.name).await?]
    } else {
        storage.chain(&args.name).await?
    };

    // the target is not read in dry-run mode
    let target = match &args.target {
        Some(target) => target.clone(),
        None => Utf8PathBuf::from("."),
    };

    output::kv("Backup", &args.name);
    output::kv("Storage", settings.storage.as_str());
    output::kv("Levels", &levels.len().to_string());
    if args.dry_run {
        output::warning("DRY RUN MODE - No files will be written");
    } else {
        output::kv("Target", target.as_str());
        tokio::fs::create_dir_all(&target)
            .await
            .with_context(|| format!("Cannot create {}", target))?;
    }
    println!();

    let total = levels.len();
    for (index, backup) in levels.into_iter().enumerate() {
        let label = output::describe_level(backup.name(), index, total);
        restore_level(&engine, &storage, backup, &target, &label).await?;
    }

    if args.dry_run {
        output::success("Dry run complete: every level read successfully");
    } else {
        output::success(&format!("Restored {} into {}", args.name, target));
    }
    Ok(())
}

async fn restore_level(
    engine: &Arc<TarEngine>,
    storage: &LocalStorage,
    backup: LocalBackup,
    target: &Utf8Path,
    label: &str,
) -> Result<()> {
    let name = backup.name().to_string();
    let source = storage.chunk_source(&backup).await?;

    let spinner = output::spinner(label);
    let errors = engine.spawn_restore(target.to_owned(), source, Arc::new(backup));
    let outcome = errors.await;
    spinner.finish_and_clear();

    // a closed channel means the restore finished without a fault; a panicked
    // restore task arrives here as an aborted fault
    if let Ok(fault) = outcome {
        return Err(fault).with_context(|| format!("Restore of {} failed", name));
    }
    output::info(&format!("Level {} restored", name));
    Ok(())
}
