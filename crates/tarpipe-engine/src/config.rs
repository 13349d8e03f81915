//! Configuration file loading.
//!
//! ```yaml
//! storage: /var/backups/tarpipe
//! compression: xz
//! encryption_key: /etc/tarpipe/backup.key
//! dereference_symlinks: false
//! exclude:
//!   - "*.tmp"
//!   - ./cache
//! chunk_size: 20000000
//! ```
//!
//! Every field is optional. Command-line flags override whatever is loaded
//! here.

use crate::compression::Compression;
use crate::engine::{EngineConfig, DEFAULT_CHUNK_SIZE};
use crate::error::{EngineError, Result};
use crate::command::{OPENSSL_PROGRAM, TAR_PROGRAM};
use crate::platform::Platform;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::debug;

/// File names searched for, in order, in each directory
pub const CONFIG_FILE_NAMES: &[&str] = &["tarpipe.yaml", "tarpipe.yml"];

/// Storage root used when none is configured
pub const DEFAULT_STORAGE_DIR: &str = "tarpipe-backups";

/// Contents of a `tarpipe.yaml` file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfigFile {
    /// Root directory of the local backup store
    pub storage: Utf8PathBuf,

    pub compression: Compression,

    /// Key file for `openssl enc`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<Utf8PathBuf>,

    pub dereference_symlinks: bool,

    pub exclude: Vec<String>,

    pub chunk_size: usize,

    pub archiver: String,

    pub encryptor: String,

    /// Compression to assume on restore instead of the manifest's
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_compression: Option<Compression>,
}

impl Default for EngineConfigFile {
    fn default() -> Self {
        Self {
            storage: Utf8PathBuf::from(DEFAULT_STORAGE_DIR),
            compression: Compression::default(),
            encryption_key: None,
            dereference_symlinks: false,
            exclude: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            archiver: TAR_PROGRAM.to_string(),
            encryptor: OPENSSL_PROGRAM.to_string(),
            restore_compression: None,
        }
    }
}

impl EngineConfigFile {
    /// Engine configuration for the current host
    pub fn to_engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::new(self.compression)
            .with_dereference(self.dereference_symlinks)
            .with_exclusions(self.exclude.clone())
            .with_platform(Platform::current())
            .with_chunk_size(self.chunk_size)
            .with_archiver(&self.archiver)
            .with_encryptor(&self.encryptor);
        if let Some(key_file) = &self.encryption_key {
            config = config.with_encryption_key(key_file.clone());
        }
        if let Some(compression) = self.restore_compression {
            config = config.with_restore_compression(compression);
        }
        config
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }
}

/// Loaded configuration and where it came from
#[derive(Debug, Clone)]
pub struct TarpipeConfig {
    pub config: EngineConfigFile,

    /// `None` when no file was found and defaults are in effect
    pub config_path: Option<Utf8PathBuf>,
}

impl TarpipeConfig {
    /// Load configuration from the specified path or search for it.
    ///
    /// An explicit path must exist. Without one, the current directory and its
    /// parents are searched and defaults are used if nothing is found.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self> {
        let found = match path {
            Some(p) => {
                let content = fs::read_to_string(p).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        EngineError::config_not_found(p.as_str())
                    } else {
                        EngineError::Io(e)
                    }
                })?;
                Some((p.to_owned(), content))
            }
            None => {
                let cwd = std::env::current_dir()?;
                let cwd = Utf8PathBuf::try_from(cwd).map_err(|_| {
                    EngineError::configuration("Current directory path is not valid UTF-8")
                })?;
                find_config(&cwd)?
            }
        };

        let Some((config_path, content)) = found else {
            debug!("No configuration file found, using defaults");
            return Ok(Self {
                config: EngineConfigFile::default(),
                config_path: None,
            });
        };

        debug!("Loading configuration from {}", config_path);
        let config = parse(&content)?;
        Ok(Self {
            config,
            config_path: Some(config_path),
        })
    }
}

fn parse(content: &str) -> Result<EngineConfigFile> {
    // an empty file deserializes to null
    if content.trim().is_empty() {
        return Ok(EngineConfigFile::default());
    }
    let config: EngineConfigFile = serde_yaml_ng::from_str(content)?;
    config.to_engine_config().validate()?;
    Ok(config)
}

/// Search `start` and its parents for a configuration file
fn find_config(start: &Utf8Path) -> Result<Option<(Utf8PathBuf, String)>> {
    let mut current = Some(start);

    while let Some(dir) = current {
        for name in CONFIG_FILE_NAMES {
            let path = dir.join(name);
            if path.is_file() {
                let content = fs::read_to_string(&path)?;
                return Ok(Some((path, content)));
            }
        }
        current = dir.parent();
    }

    Ok(None)
}
