//! Host platform detection

use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform the archiver runs on.
///
/// Decides which GNU-only tar flags are emitted. The restore target is passed
/// explicitly on every platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    /// Platform this binary was compiled for
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }

    pub fn is_windows(&self) -> bool {
        matches!(self, Self::Windows)
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix => write!(f, "unix"),
            Self::Windows => write!(f, "windows"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_matches_target() {
        assert_eq!(Platform::current().is_windows(), cfg!(windows));
    }

    #[test]
    fn test_serde_lowercase() {
        let platform: Platform = serde_yaml_ng::from_str("windows").unwrap();
        assert_eq!(platform, Platform::Windows);
        assert_eq!(Platform::Unix.to_string(), "unix");
    }
}
