//! On-disk cache layout
//!
//! ```text
//! <root>/
//! ├── acme_tiny-embed/
//! │   ├── model.json
//! │   ├── model.onnx
//! │   ├── model.onnx_data
//! │   └── tokenizer.json
//! └── other_model/
//!     └── ...
//! ```

use crate::error::{CacheError, Result};
use crate::models::manifest::{CacheEntry, MANIFEST_FILE};
use std::fs;
use std::path::{Path, PathBuf};

/// Convert a model identifier to a filesystem-safe directory name
///
/// Every character outside `[A-Za-z0-9._-]` becomes `_`, so
/// "BAAI/bge-small-en-v1.5" -> "BAAI_bge-small-en-v1.5". Distinct ids can
/// map to the same name ("a/b" and "a_b"). Names that would not stay inside
/// the cache root ("", ".", "..") are replaced by underscores.
#[must_use]
pub fn sanitize_model_id(model_id: &str) -> String {
    let name: String = model_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    match name.as_str() {
        "" => "_".to_string(),
        "." | ".." => "_".repeat(name.len()),
        _ => name,
    }
}

/// True for a bare file name that resolves inside its directory
pub(crate) fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Resolved paths of a cached model, as handed to a model runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub model: PathBuf,
    pub tokenizer: PathBuf,
    pub external_data: Option<PathBuf>,
}

/// Cache directory manager
#[derive(Debug, Clone)]
pub struct CacheDir {
    root: PathBuf,
}

impl CacheDir {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a model (not created)
    #[must_use]
    pub fn model_dir(&self, model_id: &str) -> PathBuf {
        self.root.join(sanitize_model_id(model_id))
    }

    /// Directory for a model, creating it and the cache root if needed
    pub fn ensure_model_dir(&self, model_id: &str) -> Result<PathBuf> {
        let dir = self.model_dir(model_id);
        fs::create_dir_all(&dir).map_err(|e| CacheError::fs(&dir, e))?;
        Ok(dir)
    }

    /// Manifest path for a model
    #[must_use]
    pub fn manifest_path(&self, model_id: &str) -> PathBuf {
        self.model_dir(model_id).join(MANIFEST_FILE)
    }

    /// Look up a cached model
    ///
    /// Returns `None` when there is no manifest, the manifest is unreadable,
    /// or either the model or tokenizer file it names is missing.
    #[must_use]
    pub fn get_local_model(&self, model_id: &str) -> Option<CacheEntry> {
        let dir = self.model_dir(model_id);
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return None;
        }

        let entry = match CacheEntry::load(&manifest_path) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Ignoring unreadable manifest for {model_id}: {e}");
                return None;
            }
        };

        let present = |name: &str| is_plain_file_name(name) && dir.join(name).is_file();

        if present(&entry.model_file_name) && present(&entry.tokenizer_file_name) {
            Some(entry)
        } else {
            tracing::debug!("Manifest for {model_id} references missing files");
            None
        }
    }

    /// Resolve an entry's file names to paths inside the model directory
    #[must_use]
    pub fn model_files(&self, model_id: &str, entry: &CacheEntry) -> ModelFiles {
        let dir = self.model_dir(model_id);
        ModelFiles {
            model: dir.join(&entry.model_file_name),
            tokenizer: dir.join(&entry.tokenizer_file_name),
            external_data: entry
                .external_data_file()
                .map(|name| dir.join(name))
                .filter(|path| path.is_file()),
        }
    }

    /// List ids of all models with a readable manifest
    ///
    /// Entries whose manifest has an empty `modelId` are skipped. Files are not
    /// checked; use [`CacheDir::get_local_model`] for that.
    pub fn list_model_ids(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.root).map_err(|e| CacheError::fs(&self.root, e))?;

        let mut ids: Vec<String> = entries
            .flatten()
            .map(|entry| entry.path().join(MANIFEST_FILE))
            .filter(|manifest| manifest.is_file())
            .filter_map(|manifest| CacheEntry::load(&manifest).ok())
            .map(|entry| entry.model_id)
            .filter(|id| !id.is_empty())
            .collect();

        ids.sort();
        Ok(ids)
    }

    /// Remove a model's directory; missing entries are a no-op
    pub fn delete_model(&self, model_id: &str) -> Result<()> {
        let dir = self.model_dir(model_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::info!("Removed cached model {model_id}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::fs(dir, e)),
        }
    }

    /// Total size of a model directory in bytes
    #[must_use]
    pub fn cache_size(&self, model_id: &str) -> Option<u64> {
        let dir = self.model_dir(model_id);
        if !dir.exists() {
            return None;
        }
        Some(dir_size(&dir))
    }
}

/// Recursively calculate directory size
fn dir_size(path: &Path) -> u64 {
    let mut size = 0;

    if let Ok(entries) = fs::read_dir(path) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                size += dir_size(&path);
            } else if let Ok(metadata) = fs::metadata(&path) {
                size += metadata.len();
            }
        }
    }

    size
}
