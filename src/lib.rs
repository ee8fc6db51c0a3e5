#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod error;
pub mod models;
pub mod runtime;

pub use error::{CacheError, Result};
pub use models::{CacheEntry, ModelManager, RemoteRequest};
