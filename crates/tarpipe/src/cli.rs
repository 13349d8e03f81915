//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

// Re-export command types for convenience
pub use crate::commands::backup::BackupArgs;
pub use crate::commands::list::ListArgs;
pub use crate::commands::restore::RestoreArgs;

/// tarpipe - streaming tar backups
#[derive(Parser, Debug)]
#[command(name = "tarpipe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to tarpipe.yaml config file
    #[arg(short, long, global = true)]
    pub config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Back up a directory into the store
    Backup(BackupArgs),

    /// Restore a stored backup
    Restore(RestoreArgs),

    /// List stored backups
    List(ListArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tarpipe_engine::Compression;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_backup() {
        let cli = Cli::try_parse_from([
            "tarpipe",
            "-v",
            "backup",
            "/srv/data",
            "--name",
            "mon",
            "--parent",
            "sun",
            "--compression",
            "xz",
            "--exclude",
            "*.tmp",
            "--exclude",
            "cache",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 1);
        let Commands::Backup(args) = cli.command else {
            panic!("expected backup");
        };
        assert_eq!(args.source, Utf8PathBuf::from("/srv/data"));
        assert_eq!(args.name.as_deref(), Some("mon"));
        assert_eq!(args.parent.as_deref(), Some("sun"));
        assert_eq!(args.compression, Some(Compression::Xz));
        assert_eq!(args.exclude, vec!["*.tmp", "cache"]);
    }

    #[test]
    fn test_parse_backup_rejects_unknown_compression() {
        assert!(Cli::try_parse_from(["tarpipe", "backup", "/srv", "--compression", "lz4"]).is_err());
    }

    #[test]
    fn test_restore_requires_target_unless_dry_run() {
        assert!(Cli::try_parse_from(["tarpipe", "restore", "nightly"]).is_err());

        let cli = Cli::try_parse_from(["tarpipe", "restore", "nightly", "--dry-run"]).unwrap();
        let Commands::Restore(args) = cli.command else {
            panic!("expected restore");
        };
        assert!(args.dry_run);
        assert!(args.target.is_none());

        let cli = Cli::try_parse_from([
            "tarpipe", "restore", "nightly", "-d", "/restore", "--level-only",
        ])
        .unwrap();
        let Commands::Restore(args) = cli.command else {
            panic!("expected restore");
        };
        assert_eq!(args.target, Some(Utf8PathBuf::from("/restore")));
        assert!(args.level_only);
    }

    #[test]
    fn test_global_config_flag() {
        let cli =
            Cli::try_parse_from(["tarpipe", "list", "--config", "/etc/tarpipe.yaml"]).unwrap();
        assert_eq!(cli.config, Some(Utf8PathBuf::from("/etc/tarpipe.yaml")));
    }
}
