//! Model cache
//!
//! Provides functionality for:
//! - Resolving a model's files from the hub listing
//! - Planning and running single-stream or parallel range downloads
//! - Persisting per-model manifests and validating cached files
//! - Importing models bundled with the application

pub mod assets;
pub mod cache;
pub mod download;
pub mod manager;
pub mod manifest;
pub mod plan;
pub mod remote;

pub use assets::{AssetSource, DirectoryAssets};
pub use cache::{sanitize_model_id, CacheDir, ModelFiles};
pub use download::{
    format_bytes, ByteProgress, DownloadOptions, DownloadOutcome, Downloader, TransferMode,
};
pub use manager::{ModelManager, ProgressCallback, RemoteRequest};
pub use manifest::{CacheEntry, ModelSource};
pub use plan::{plan_download, ByteRange, DownloadPlan, RemoteFileInfo};
pub use remote::{HubClient, ResolvedFiles};
