//! Compression algorithms understood by the archiver.
//!
//! The engine never compresses anything itself; it only selects the tar flag
//! that makes the archiver do it.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Compression used when none is configured.
pub const DEFAULT_COMPRESSION: Compression = Compression::Gzip;

/// Compression algorithm applied by tar to the archive stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Gzip,
    Bzip2,
    Xz,
}

impl Compression {
    /// Flag selecting this algorithm on the tar command line
    pub fn tar_flag(&self) -> &'static str {
        match self {
            Self::Gzip => "--gzip",
            Self::Bzip2 => "--bzip2",
            Self::Xz => "--xz",
        }
    }

    /// Name stored in backup manifests
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
            Self::Xz => "xz",
        }
    }
}

impl Default for Compression {
    fn default() -> Self {
        DEFAULT_COMPRESSION
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gzip" | "gz" => Ok(Self::Gzip),
            "bzip2" | "bz2" => Ok(Self::Bzip2),
            "xz" => Ok(Self::Xz),
            other => Err(EngineError::configuration(format!(
                "Unsupported compression: {}. Valid algorithms: gzip, bzip2, xz",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names_and_aliases() {
        assert_eq!("gzip".parse::<Compression>().unwrap(), Compression::Gzip);
        assert_eq!("GZ".parse::<Compression>().unwrap(), Compression::Gzip);
        assert_eq!("bzip2".parse::<Compression>().unwrap(), Compression::Bzip2);
        assert_eq!(" xz ".parse::<Compression>().unwrap(), Compression::Xz);
    }

    #[test]
    fn test_parse_unknown_is_configuration_error() {
        let err = "zip".parse::<Compression>().unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
        assert!(err.to_string().contains("zip"));
    }

    #[test]
    fn test_tar_flags() {
        assert_eq!(Compression::Gzip.tar_flag(), "--gzip");
        assert_eq!(Compression::Bzip2.tar_flag(), "--bzip2");
        assert_eq!(Compression::Xz.tar_flag(), "--xz");
    }

    #[test]
    fn test_default_is_gzip() {
        assert_eq!(Compression::default(), Compression::Gzip);
        assert_eq!(Compression::default().to_string(), "gzip");
    }
}
