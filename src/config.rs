//! Configuration loading and management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration, read from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage root holding `instances/` and `metadata/`.
    #[serde(default = "crate::paths::default_data_root")]
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            data_dir: crate::paths::default_data_root(),
        }
    }
}

/// Connection details for the assignment server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL, e.g. `https://field.example.org`.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub username: Option<String>,
}

impl Config {
    /// Load configuration from the given path, or from `config.json` under
    /// the default data root. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => crate::paths::default_data_root().join("config.json"),
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Stable source identity derived from the server host.
    ///
    /// Every record in both databases is partitioned by this value, so two
    /// server identities never intermingle on one device.
    pub fn source(&self) -> Option<String> {
        let url = self.server.url.as_deref()?;
        let host = url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .split('/')
            .next()
            .unwrap_or_default();
        if host.is_empty() {
            return None;
        }
        Some(host.to_string())
    }
}
