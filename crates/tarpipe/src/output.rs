//! Terminal output for backup and restore runs
//!
//! Status lines go to stdout, warnings to stderr. The `describe_*` helpers
//! only build strings so listings can be checked without a terminal.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tarpipe_engine::{BackupManifest, BackupStatistics};

const SPINNER_TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

pub fn success(msg: &str) {
    println!("{} {}", style("✓").green().bold(), msg);
}

pub fn warning(msg: &str) {
    eprintln!("{} {}", style("⚠").yellow().bold(), msg);
}

pub fn info(msg: &str) {
    println!("{} {}", style("ℹ").blue().bold(), msg);
}

pub fn header(msg: &str) {
    println!("\n{}", style(msg).bold().underlined());
}

/// Print an indented `key: value` line
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", style(key).dim(), value);
}

/// Print the stream statistics of a stored backup
pub fn statistics(stats: &BackupStatistics) {
    kv("Chunks", &stats.chunk_count.to_string());
    kv("Size", &stats.human_readable_size());
    if let Some(seconds) = stats.duration_seconds {
        kv("Duration", &describe_duration(seconds));
    }
}

/// Print one row of a backup listing
pub fn backup_entry(manifest: &BackupManifest) {
    println!(
        "  {} {}",
        style(&manifest.backup_name).bold(),
        style(describe_manifest(manifest)).dim()
    );
}

/// One-line summary of a manifest: level, size, compression, time, then
/// encryption and parent when present.
pub fn describe_manifest(manifest: &BackupManifest) -> String {
    let mut details = format!(
        "level {}, {}, {}, {}",
        manifest.level,
        manifest.statistics.human_readable_size(),
        manifest.compression.as_deref().unwrap_or("unrecorded compression"),
        manifest.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
    );
    if manifest.encryption {
        details.push_str(", encrypted");
    }
    if let Some(parent) = &manifest.parent {
        details.push_str(&format!(", parent {}", parent));
    }
    details
}

/// Seconds below a minute keep one decimal, longer runs show minutes.
pub fn describe_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else {
        let whole = seconds.round() as u64;
        format!("{}m{:02}s", whole / 60, whole % 60)
    }
}

/// Progress label for one level of a restore chain (`index` counts from 0)
pub fn describe_level(name: &str, index: usize, total: usize) -> String {
    if total > 1 {
        format!("Restoring {} (level {}/{})...", name, index + 1, total)
    } else {
        format!("Restoring {}...", name)
    }
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let spinner_style = ProgressStyle::with_template("{spinner:.blue} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(SPINNER_TICKS);
    pb.set_style(spinner_style);
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
