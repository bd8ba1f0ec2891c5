//! Configuration management for strongbox

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::paths::Paths;

/// Flags passed to gpg on every invocation
pub const DEFAULT_GPG_ARGS: &[&str] = &[
    "--quiet",
    "--yes",
    "--compress-algo=none",
    "--no-encrypt-to",
    "--no-auto-check-trustdb",
    "--batch",
];

/// Persisted strongbox configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Root directory of the vault
    #[serde(default)]
    pub vault_path: PathBuf,

    #[serde(default)]
    pub gpg: GpgSettings,

    #[serde(default)]
    pub api: ApiSettings,
}

/// How the gpg binary is invoked
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GpgSettings {
    #[serde(default = "default_gpg_binary")]
    pub binary: String,

    #[serde(default = "default_gpg_args")]
    pub args: Vec<String>,
}

impl Default for GpgSettings {
    fn default() -> Self {
        Self {
            binary: default_gpg_binary(),
            args: default_gpg_args(),
        }
    }
}

/// Where the API server listens
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiSettings {
    #[serde(default = "default_api_host")]
    pub host: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

impl ApiSettings {
    /// Listen address in `host:port` form
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_gpg_binary() -> String {
    "gpg".to_string()
}

fn default_gpg_args() -> Vec<String> {
    DEFAULT_GPG_ARGS.iter().map(|s| s.to_string()).collect()
}

fn default_api_host() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8076
}

impl Config {
    /// Default configuration for a state directory
    pub fn for_paths(paths: &Paths) -> Self {
        Self {
            vault_path: paths.default_vault(),
            ..Self::default()
        }
    }

    /// Load config from file, filling in defaults for missing fields
    pub fn load(path: &Path, paths: &Paths) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::for_paths(paths));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config: {}", path.display()))?;

        if config.vault_path.as_os_str().is_empty() {
            config.vault_path = paths.default_vault();
        }

        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }
}
