//! Configuration module for model-cache
//!
//! Loads config from `$XDG_CONFIG_HOME/model-cache/config.toml` or `~/.config/model-cache/config.toml`.
//! Falls back to embedded defaults if file doesn't exist.
//! Partial configs are merged with defaults using serde's default attributes.
//!
//! # Example
//!
//! ```no_run
//! use model_cache::config::Config;
//!
//! let config = Config::load().expect("Failed to load config");
//! println!("Cache root: {}", config.cache.root.display());
//! println!("Connections: {}", config.download.max_connections);
//! ```

pub mod schema;

pub use schema::{config_path, CacheConfig, Config, DownloadConfig, RemoteConfig};
