//! Configuration surface for the link manager.
//!
//! Data only: a thin `serde` + `toml` deserialization step, no CLI parsing
//! and no file-watching layer. No environment variables are defined at this
//! layer.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Root directory scanned for dynamic transport plugins. Only consulted
    /// when the `dynamic-plugins` feature is enabled.
    #[serde(default)]
    pub plugin_root: Option<PathBuf>,

    /// Schemes this node wants registered transports for.
    #[serde(default)]
    pub schemes: Vec<String>,

    /// Serialization formats this node's transports should support.
    #[serde(default)]
    pub formats: Vec<String>,
}

impl Config {
    /// Parses a TOML document into a `Config`.
    pub fn from_toml(raw: &str) -> Result<Self, Error> {
        toml::from_str(raw).map_err(|err| Error::InvalidConfig(err.to_string()))
    }

    /// Reads and parses a TOML config file.
    pub fn load(path: &std::path::Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| Error::InvalidConfig(format!("{}: {}", path.display(), err)))?;
        Self::from_toml(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let config = Config::from_toml(
            r#"
            schemes = ["tcp", "ws"]
            formats = ["json"]
            "#,
        )
        .unwrap();
        assert_eq!(config.schemes, vec!["tcp", "ws"]);
        assert_eq!(config.formats, vec!["json"]);
        assert!(config.plugin_root.is_none());
    }

    #[test]
    fn defaults_to_empty_lists() {
        let config = Config::from_toml("").unwrap();
        assert!(config.schemes.is_empty());
        assert!(config.formats.is_empty());
    }
}
