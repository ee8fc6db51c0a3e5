use crate::config::schema::{Config, DownloadConfig};
use crate::error::{CacheError, Result};
use crate::models::assets::{asset_file_name, AssetSource};
use crate::models::cache::{is_plain_file_name, CacheDir, ModelFiles};
use crate::models::download::{
    format_bytes, ByteProgress, DownloadOptions, Downloader, TransferMode,
};
use crate::models::manifest::{CacheEntry, ModelSource, EXTERNAL_DATA_KEY, MANIFEST_FILE};
use crate::models::remote::{build_client, resolve_files, HubClient};
use crate::runtime::ModelRuntime;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Progress for a model pull: `(file_label, bytes_received, total_bytes)`
///
/// `file_label` is the remote file name. May be called concurrently when more
/// than one connection is used.
pub type ProgressCallback = Arc<dyn Fn(&str, u64, Option<u64>) + Send + Sync>;

/// Parameters for fetching a model from the hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRequest {
    pub revision: String,
    /// Remote model file to use instead of the selection heuristic
    pub model_file: Option<String>,
    /// Remote tokenizer file to use instead of the selection heuristic
    pub tokenizer_file: Option<String>,
    pub include_external_data: bool,
    pub max_connections: usize,
    /// Re-download files that are already cached
    pub force: bool,
}

impl Default for RemoteRequest {
    fn default() -> Self {
        Self {
            revision: "main".to_string(),
            model_file: None,
            tokenizer_file: None,
            include_external_data: true,
            max_connections: 1,
            force: false,
        }
    }
}

impl RemoteRequest {
    /// Request defaults taken from the `[download]` config section
    #[must_use]
    pub fn from_config(config: &DownloadConfig) -> Self {
        Self {
            revision: config.revision.clone(),
            include_external_data: config.include_external_data,
            max_connections: config.max_connections,
            ..Self::default()
        }
    }
}

/// Model manager for fetching, importing, listing and evicting cached models
#[derive(Debug, Clone)]
pub struct ModelManager {
    cache: CacheDir,
    hub: HubClient,
    downloader: Downloader,
}

impl ModelManager {
    /// Create a manager from config
    pub fn new(config: &Config) -> Result<Self> {
        let client = build_client(config.token().as_deref())?;
        Ok(Self::with_client(
            config.cache.root.clone(),
            &config.remote.endpoint,
            client,
            config.download.part_size,
        ))
    }

    /// Create a manager on an existing HTTP client
    #[must_use]
    pub fn with_client(
        cache_root: PathBuf,
        endpoint: &str,
        client: reqwest::Client,
        part_size: u64,
    ) -> Self {
        Self {
            cache: CacheDir::new(cache_root),
            hub: HubClient::new(client.clone(), endpoint),
            downloader: Downloader::new(client).with_part_size(part_size),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &CacheDir {
        &self.cache
    }

    /// Cached entry for a model, if all of its files are present
    #[must_use]
    pub fn get_local_model(&self, model_id: &str) -> Option<CacheEntry> {
        self.cache.get_local_model(model_id)
    }

    /// Ids of all cached models
    pub fn list_model_ids(&self) -> Result<Vec<String>> {
        self.cache.list_model_ids()
    }

    /// Evict a model; evicting an uncached model is a no-op
    pub fn delete_model(&self, model_id: &str) -> Result<()> {
        self.cache.delete_model(model_id)
    }

    /// Resolved paths of a cached model
    #[must_use]
    pub fn model_files(&self, model_id: &str) -> Option<ModelFiles> {
        self.get_local_model(model_id)
            .map(|entry| self.cache.model_files(model_id, &entry))
    }

    /// Hand a cached model's paths to a runtime
    pub fn load_with<R: ModelRuntime>(&self, runtime: &R, model_id: &str) -> Result<R::Session> {
        let files = self.model_files(model_id).ok_or_else(|| {
            CacheError::ModelFilesMissing(format!("Model '{model_id}' is not cached"))
        })?;
        runtime.load(&files)
    }

    /// Cache a model from files bundled with the application
    ///
    /// Files are stored under their base names; existing files are kept
    /// unless `overwrite` is set.
    pub async fn from_assets(
        &self,
        model_id: &str,
        assets: &dyn AssetSource,
        model_asset: &str,
        tokenizer_asset: &str,
        overwrite: bool,
    ) -> Result<CacheEntry> {
        let model_name = local_file_name(asset_file_name(model_asset))?;
        let tokenizer_name = local_file_name(asset_file_name(tokenizer_asset))?;
        let dir = self.cache.ensure_model_dir(model_id)?;

        for (asset_ref, name) in [(model_asset, &model_name), (tokenizer_asset, &tokenizer_name)] {
            let dest = dir.join(name);
            if dest.exists() && !overwrite {
                tracing::debug!("{} exists, keeping it", dest.display());
                continue;
            }
            assets.copy_to(asset_ref, &dest).await?;
        }

        let entry = CacheEntry::new(model_id, ModelSource::Asset, &model_name, &tokenizer_name);
        entry.save(&dir.join(MANIFEST_FILE))?;

        tracing::info!("Cached {model_id} from bundled assets");
        Ok(entry)
    }

    /// Fetch a model from the hub into the cache
    ///
    /// The model file, tokenizer and (optionally) external data shard are
    /// downloaded one after another; the manifest is written only once all of
    /// them are in place, so an error never leaves a new entry behind.
    pub async fn from_remote(
        &self,
        model_id: &str,
        request: &RemoteRequest,
        progress: Option<ProgressCallback>,
    ) -> Result<CacheEntry> {
        let needs_listing = request.model_file.is_none()
            || request.tokenizer_file.is_none()
            || request.include_external_data;
        let listing = if needs_listing {
            self.hub.list_files(model_id, &request.revision).await?
        } else {
            Vec::new()
        };

        let resolved = resolve_files(
            &listing,
            request.model_file.as_deref(),
            request.tokenizer_file.as_deref(),
            request.include_external_data,
        )?;
        tracing::info!(
            "Resolved {model_id}@{}: model={}, tokenizer={}, external data={}",
            request.revision,
            resolved.model,
            resolved.tokenizer,
            resolved.external_data.as_deref().unwrap_or("none")
        );

        let model_name = local_file_name(asset_file_name(&resolved.model))?;
        let tokenizer_name = local_file_name(asset_file_name(&resolved.tokenizer))?;
        let data_name = resolved
            .external_data
            .as_deref()
            .map(|name| local_file_name(asset_file_name(name)))
            .transpose()?;

        let dir = self.cache.ensure_model_dir(model_id)?;
        let options = DownloadOptions {
            overwrite: request.force,
            max_connections: request.max_connections,
        };

        let mut targets = vec![
            (resolved.model.as_str(), model_name.as_str()),
            (resolved.tokenizer.as_str(), tokenizer_name.as_str()),
        ];
        if let (Some(remote), Some(local)) = (resolved.external_data.as_deref(), data_name.as_deref())
        {
            targets.push((remote, local));
        }

        for (remote, local) in targets {
            self.fetch_file(
                model_id,
                &request.revision,
                remote,
                &dir.join(local),
                options,
                progress.as_ref(),
            )
            .await?;
        }

        let mut entry = CacheEntry::new(model_id, ModelSource::Remote, &model_name, &tokenizer_name);
        entry.revision = Some(request.revision.clone());
        if let Some(data_name) = data_name {
            entry
                .extra_files
                .insert(EXTERNAL_DATA_KEY.to_string(), data_name);
        }
        entry.save(&dir.join(MANIFEST_FILE))?;

        tracing::info!("Cached {model_id} in {}", dir.display());
        Ok(entry)
    }

    async fn fetch_file(
        &self,
        model_id: &str,
        revision: &str,
        remote: &str,
        dest: &Path,
        options: DownloadOptions,
        progress: Option<&ProgressCallback>,
    ) -> Result<()> {
        let url = self.hub.file_url(model_id, revision, remote);
        let byte_progress = progress.map(|callback| {
            let callback = Arc::clone(callback);
            let label = remote.to_string();
            Arc::new(move |received: u64, total: Option<u64>| callback(&label, received, total))
                as ByteProgress
        });

        let outcome = self
            .downloader
            .download(&url, dest, options, byte_progress)
            .await?;

        match outcome.mode {
            TransferMode::Skipped => tracing::info!("{remote} already cached"),
            mode => tracing::info!(
                "Downloaded {remote} ({}, {mode:?})",
                format_bytes(outcome.bytes)
            ),
        }
        Ok(())
    }
}

/// Validate the name a file is stored under inside a model directory
fn local_file_name(name: &str) -> Result<String> {
    if name == MANIFEST_FILE || !is_plain_file_name(name) {
        return Err(CacheError::ModelFilesMissing(format!(
            "'{name}' cannot be stored in the cache"
        )));
    }
    Ok(name.to_string())
}
