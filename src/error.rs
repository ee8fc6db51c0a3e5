use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the model cache
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Network error for {url}{}: {message}\n\nTroubleshooting:\n- Check internet connection\n- Verify the endpoint in config ([remote] endpoint) or HF_ENDPOINT\n- Gated models need a token: export HF_TOKEN=...", status_suffix(.status))]
    Network {
        url: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Could not resolve model files from {url}{}: {message}\n\nTroubleshooting:\n- Check the model id and revision\n- Private models need a token: export HF_TOKEN=...", status_suffix(.status))]
    Resolution {
        url: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Model files missing: {0}\n\nTroubleshooting:\n- List the repository files on the hub\n- Pass --model-file / --tokenizer-file to pick files explicitly")]
    ModelFilesMissing(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Filesystem error at {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not enough disk space: {required} bytes required, {available} bytes available")]
    InsufficientSpace { required: u64, available: u64 },

    #[error("Asset error: {0}")]
    Asset(String),

    #[error("Config error: {0}\n\nTroubleshooting:\n- Check config file: ~/.config/model-cache/config.toml\n- Run with RUST_LOG=debug for more details")]
    Config(String),

    #[error("Model runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

impl CacheError {
    /// Wrap an I/O error with the path it happened on
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Build a network error from a reqwest failure
    pub fn network(url: &str, err: &reqwest::Error) -> Self {
        Self::Network {
            url: url.to_string(),
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }

    /// HTTP status carried by network and resolution errors
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Network { status, .. } | Self::Resolution { status, .. } => *status,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
