use crate::error::{CacheError, Result};
use crate::models::plan::DEFAULT_PART_SIZE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub download: DownloadConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    #[serde(default = "default_cache_root")]
    pub root: PathBuf,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct RemoteConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Literal token; takes precedence over `token_env`
    pub token: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct DownloadConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_part_size")]
    pub part_size: u64,
    #[serde(default = "default_true")]
    pub include_external_data: bool,
    #[serde(default = "default_revision")]
    pub revision: String,
}

// Default value functions
fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("model-cache")
}
fn default_endpoint() -> String {
    "https://huggingface.co".to_string()
}
fn default_token_env() -> String {
    "HF_TOKEN".to_string()
}
fn default_max_connections() -> usize {
    1
}
fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}
fn default_true() -> bool {
    true
}
fn default_revision() -> String {
    "main".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_cache_root(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token_env: default_token_env(),
            token: None,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            part_size: default_part_size(),
            include_external_data: default_true(),
            revision: default_revision(),
        }
    }
}

impl Config {
    /// Load config from the user config directory, falling back to defaults
    /// when no file exists. `HF_ENDPOINT` overrides the configured endpoint.
    pub fn load() -> Result<Self> {
        let mut config = match config_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };

        if let Ok(endpoint) = std::env::var("HF_ENDPOINT") {
            if !endpoint.is_empty() {
                config.remote.endpoint = endpoint;
            }
        }

        Ok(config)
    }

    /// Load config from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| CacheError::fs(path, e))?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            CacheError::Config(format!("Failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.download.part_size == 0 {
            return Err(CacheError::Config(
                "download.part_size must be greater than 0".to_string(),
            ));
        }
        if self.remote.endpoint.trim().is_empty() {
            return Err(CacheError::Config(
                "remote.endpoint must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Bearer token for hub requests, if one is configured
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.remote
            .token
            .clone()
            .or_else(|| std::env::var(&self.remote.token_env).ok())
            .filter(|t| !t.is_empty())
    }
}

/// Get config file path (`$XDG_CONFIG_HOME/model-cache/config.toml`)
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    let base = if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config)
    } else {
        dirs::home_dir()?.join(".config")
    };
    Some(base.join("model-cache").join("config.toml"))
}
