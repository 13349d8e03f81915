//! CLI command implementations

pub mod backup;
pub mod list;
pub mod restore;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use tarpipe_engine::{EngineConfigFile, TarpipeConfig};
use tracing::debug;

/// Load configuration and apply the `--storage` override
pub(crate) fn load_settings(
    config: Option<&Utf8Path>,
    storage: Option<Utf8PathBuf>,
) -> Result<EngineConfigFile> {
    let loaded = TarpipeConfig::load(config).context("Failed to load configuration")?;
    if let Some(path) = &loaded.config_path {
        debug!("Using configuration from {}", path);
    }

    let mut settings = loaded.config;
    if let Some(storage) = storage {
        settings.storage = storage;
    }
    Ok(settings)
}
