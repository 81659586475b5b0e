//! Write modes gating registration and deletion

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Per-scope write mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteMode {
    #[default]
    #[serde(rename = "READWRITE")]
    ReadWrite,
    #[serde(rename = "READONLY")]
    ReadOnly,
    /// Kill switch; only honored on the default context or `__GLOBAL`
    #[serde(rename = "READONLY_OVERRIDE")]
    ReadOnlyOverride,
    /// Explicit IDs and versions are accepted; compatibility is skipped
    Import,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::ReadWrite => "READWRITE",
            WriteMode::ReadOnly => "READONLY",
            WriteMode::ReadOnlyOverride => "READONLY_OVERRIDE",
            WriteMode::Import => "IMPORT",
        }
    }

    /// Whether writes are rejected under this mode
    pub fn is_read_only(&self) -> bool {
        matches!(self, WriteMode::ReadOnly | WriteMode::ReadOnlyOverride)
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteMode {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "READWRITE" => Ok(WriteMode::ReadWrite),
            "READONLY" => Ok(WriteMode::ReadOnly),
            "READONLY_OVERRIDE" => Ok(WriteMode::ReadOnlyOverride),
            "IMPORT" => Ok(WriteMode::Import),
            _ => Err(RegistryError::InvalidMode(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_round_trip() {
        for mode in [
            WriteMode::ReadWrite,
            WriteMode::ReadOnly,
            WriteMode::ReadOnlyOverride,
            WriteMode::Import,
        ] {
            assert_eq!(mode.as_str().parse::<WriteMode>().unwrap(), mode);
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{}\"", mode));
        }
        assert_eq!("readonly".parse::<WriteMode>().unwrap(), WriteMode::ReadOnly);
    }

    #[test]
    fn test_invalid_mode() {
        assert!(matches!("WRITEONLY".parse::<WriteMode>(), Err(RegistryError::InvalidMode(_))));
    }
}
