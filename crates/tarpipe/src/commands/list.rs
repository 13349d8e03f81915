//! List command

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use tarpipe_engine::LocalStorage;

use crate::output;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Storage directory (overrides the config file)
    #[arg(short, long)]
    pub storage: Option<Utf8PathBuf>,

    /// Output manifests as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: ListArgs, config: Option<&Utf8Path>) -> Result<()> {
    let settings = super::load_settings(config, args.storage)?;
    let storage = LocalStorage::new(settings.storage);
    let manifests = storage.list().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&manifests)?);
        return Ok(());
    }

    if manifests.is_empty() {
        output::info(&format!("No backups in {}", storage.root()));
        return Ok(());
    }

    output::header(&format!("Backups in {}", storage.root()));
    for manifest in &manifests {
        output::backup_entry(manifest);
    }

    Ok(())
}
