//! Archiver command construction.
//!
//! Commands are built as a pipeline of [`Stage`]s, each an explicit program
//! plus a vector of discrete argument tokens handed straight to the OS. No
//! shell ever sees them, so paths and patterns are carried verbatim. User
//! supplied values are attached in `--flag=value` form so a value can never be
//! read as a separate option, and every value is validated when the command is
//! built.
//!
//! Option tokens are emitted in a fixed order regardless of the order the
//! setters were called in, so building the same option set always yields the
//! same command.

use crate::compression::Compression;
use crate::error::{EngineError, Result};
use crate::platform::Platform;
use camino::{Utf8Path, Utf8PathBuf};
use std::borrow::Cow;
use std::fmt;

/// Default archiver executable.
pub const TAR_PROGRAM: &str = "tar";

/// Default encryption executable.
pub const OPENSSL_PROGRAM: &str = "openssl";

/// Cipher passed to `openssl enc`.
pub const ENCRYPTION_CIPHER: &str = "-aes-256-cfb";

/// Flags understood only by GNU tar, emitted on Unix hosts when creating.
const GNU_CREATE_FLAGS: &[&str] = &[
    "--warning=none",
    "--no-check-device",
    "--one-file-system",
    "--preserve-permissions",
    "--ignore-failed-read",
];

/// Flags understood only by GNU tar, emitted on Unix hosts when reading.
const GNU_READ_FLAGS: &[&str] = &["--warning=none"];

/// One program of a command pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    program: String,
    args: Vec<String>,
}

impl Stage {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument token
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several argument tokens
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", display_token(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", display_token(arg))?;
        }
        Ok(())
    }
}

/// A fully rendered command: stages connected stdout → stdin in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    stages: Vec<Stage>,
}

impl CommandSpec {
    /// Create a pipeline. At least one stage is required.
    pub fn new(stages: Vec<Stage>) -> Result<Self> {
        if stages.is_empty() {
            return Err(EngineError::invalid_argument(
                "command",
                "a command needs at least one stage",
            ));
        }
        for stage in &stages {
            validate_value("program", stage.program())?;
        }
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Stage running the given program, if present
    pub fn stage(&self, program: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.program() == program)
    }
}

/// Rendered for logs only; shell-style quoting is applied to tokens that
/// would otherwise be ambiguous to a human reader.
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{}", stage)?;
        }
        Ok(())
    }
}

fn display_token(token: &str) -> Cow<'_, str> {
    let plain = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_=./:,+@%".contains(c));
    if plain {
        Cow::Borrowed(token)
    } else {
        Cow::Owned(format!("{:?}", token))
    }
}

/// Reject values that cannot be passed to a program as a single token.
pub(crate) fn validate_value(name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(EngineError::invalid_argument(name, "must not be empty"));
    }
    if value.contains('\0') {
        return Err(EngineError::invalid_argument(
            name,
            "must not contain NUL bytes",
        ));
    }
    Ok(())
}

fn encryption_stage(program: &str, key_file: &Utf8Path, decrypt: bool) -> Result<Stage> {
    validate_value("encryption key file", key_file.as_str())?;
    let mut stage = Stage::new(program).arg("enc");
    if decrypt {
        stage = stage.arg("-d");
    }
    Ok(stage
        .arg(ENCRYPTION_CIPHER)
        .arg("-pass")
        .arg(format!("file:{}", key_file)))
}

/// Builds the command that streams an archive of a directory to stdout.
#[derive(Debug, Clone)]
pub struct BackupCommandBuilder {
    path: Utf8PathBuf,
    compression: Compression,
    platform: Platform,
    archiver: String,
    encryptor: String,
    encryption_key: Option<Utf8PathBuf>,
    dereference: bool,
    exclude: Vec<String>,
    listed_incremental: Option<Utf8PathBuf>,
}

impl BackupCommandBuilder {
    /// Create a builder archiving the contents of `path`
    pub fn new(path: impl Into<Utf8PathBuf>, compression: Compression, platform: Platform) -> Self {
        Self {
            path: path.into(),
            compression,
            platform,
            archiver: TAR_PROGRAM.to_string(),
            encryptor: OPENSSL_PROGRAM.to_string(),
            encryption_key: None,
            dereference: false,
            exclude: Vec::new(),
            listed_incremental: None,
        }
    }

    /// Use a different archiver executable
    pub fn with_archiver(mut self, program: impl Into<String>) -> Self {
        self.archiver = program.into();
        self
    }

    /// Use a different encryption executable
    pub fn with_encryptor(mut self, program: impl Into<String>) -> Self {
        self.encryptor = program.into();
        self
    }

    /// Pipe the archive through encryption keyed by `key_file`
    pub fn set_encryption(&mut self, key_file: impl Into<Utf8PathBuf>) -> &mut Self {
        self.encryption_key = Some(key_file.into());
        self
    }

    /// Archive symlink targets instead of the links
    pub fn set_dereference(&mut self, dereference: bool) -> &mut Self {
        self.dereference = dereference;
        self
    }

    /// Omit paths matching any of the patterns
    pub fn set_exclude<I, S>(&mut self, patterns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Consult and update the snapshot file so only changes are archived
    pub fn set_listed_incremental(&mut self, snapshot_file: impl Into<Utf8PathBuf>) -> &mut Self {
        self.listed_incremental = Some(snapshot_file.into());
        self
    }

    /// Render the pipeline
    pub fn build(&self) -> Result<CommandSpec> {
        validate_value("backup path", self.path.as_str())?;

        let mut tar = Stage::new(&self.archiver)
            .arg("--create")
            .arg(self.compression.tar_flag());

        if !self.platform.is_windows() {
            tar = tar.args(GNU_CREATE_FLAGS.iter().copied());
        }

        if self.dereference {
            tar = tar.arg("--dereference");
        }

        if let Some(snapshot) = &self.listed_incremental {
            validate_value("listed-incremental file", snapshot.as_str())?;
            tar = tar.arg(format!("--listed-incremental={}", snapshot));
        }

        for pattern in &self.exclude {
            validate_value("exclude pattern", pattern)?;
            tar = tar.arg(format!("--exclude={}", pattern));
        }

        tar = tar.arg(format!("--directory={}", self.path)).arg(".");

        let mut stages = vec![tar];
        if let Some(key_file) = &self.encryption_key {
            stages.push(encryption_stage(&self.encryptor, key_file, false)?);
        }

        CommandSpec::new(stages)
    }
}

/// Builds the command that reads an archive from stdin and materialises it.
#[derive(Debug, Clone)]
pub struct RestoreCommandBuilder {
    restore_path: Utf8PathBuf,
    compression: Compression,
    platform: Platform,
    archiver: String,
    encryptor: String,
    encryption_key: Option<Utf8PathBuf>,
    dry_run: bool,
}

impl RestoreCommandBuilder {
    /// Create a builder extracting into `restore_path`
    pub fn new(
        restore_path: impl Into<Utf8PathBuf>,
        compression: Compression,
        platform: Platform,
    ) -> Self {
        Self {
            restore_path: restore_path.into(),
            compression,
            platform,
            archiver: TAR_PROGRAM.to_string(),
            encryptor: OPENSSL_PROGRAM.to_string(),
            encryption_key: None,
            dry_run: false,
        }
    }

    /// Use a different archiver executable
    pub fn with_archiver(mut self, program: impl Into<String>) -> Self {
        self.archiver = program.into();
        self
    }

    /// Use a different encryption executable
    pub fn with_encryptor(mut self, program: impl Into<String>) -> Self {
        self.encryptor = program.into();
        self
    }

    /// Decrypt the incoming stream with `key_file` before extraction
    pub fn set_encryption(&mut self, key_file: impl Into<Utf8PathBuf>) -> &mut Self {
        self.encryption_key = Some(key_file.into());
        self
    }

    /// Read and list the whole archive without writing any file
    pub fn set_dry_run(&mut self) -> &mut Self {
        self.dry_run = true;
        self
    }

    /// Render the pipeline
    pub fn build(&self) -> Result<CommandSpec> {
        validate_value("restore path", self.restore_path.as_str())?;

        let mut stages = Vec::with_capacity(2);
        if let Some(key_file) = &self.encryption_key {
            stages.push(encryption_stage(&self.encryptor, key_file, true)?);
        }

        let mode = if self.dry_run { "--list" } else { "--extract" };
        let mut tar = Stage::new(&self.archiver)
            .arg(mode)
            .arg(self.compression.tar_flag())
            .arg("--incremental");

        if !self.dry_run {
            tar = tar.arg("--unlink-first");
        }
        tar = tar.arg("--ignore-zeros");

        if !self.platform.is_windows() {
            tar = tar.args(GNU_READ_FLAGS.iter().copied());
        }

        if !self.dry_run {
            tar = tar.arg(format!("--directory={}", self.restore_path));
        }
        stages.push(tar.arg("--file=-"));

        CommandSpec::new(stages)
    }
}
