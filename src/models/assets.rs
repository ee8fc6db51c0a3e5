use crate::error::{CacheError, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

/// Source of model files bundled with the host application
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Copy the asset named `asset_ref` to `dest`, returning the bytes written
    async fn copy_to(&self, asset_ref: &str, dest: &Path) -> Result<u64>;
}

/// Assets stored as plain files under a bundle directory
#[derive(Debug, Clone)]
pub struct DirectoryAssets {
    root: PathBuf,
}

impl DirectoryAssets {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve an asset reference inside the bundle directory
    fn resolve(&self, asset_ref: &str) -> Result<PathBuf> {
        let relative = Path::new(asset_ref);
        let inside = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if asset_ref.is_empty() || !inside {
            return Err(CacheError::Asset(format!(
                "Asset reference '{asset_ref}' must be a relative path inside {}",
                self.root.display()
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl AssetSource for DirectoryAssets {
    async fn copy_to(&self, asset_ref: &str, dest: &Path) -> Result<u64> {
        let source = self.resolve(asset_ref)?;
        if !tokio::fs::metadata(&source)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            return Err(CacheError::Asset(format!(
                "Asset '{asset_ref}' not found at {}",
                source.display()
            )));
        }

        let staging = crate::models::download::staging_path(dest);
        let copied = match tokio::fs::copy(&source, &staging).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(CacheError::fs(&staging, e));
            }
        };
        tokio::fs::rename(&staging, dest)
            .await
            .map_err(|e| CacheError::fs(dest, e))?;

        tracing::debug!("Copied asset {asset_ref} to {}", dest.display());
        Ok(copied)
    }
}

/// File name an asset is stored under in the cache (its last path segment)
#[must_use]
pub fn asset_file_name(asset_ref: &str) -> &str {
    asset_ref.rsplit(['/', '\\']).next().unwrap_or(asset_ref)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_asset_file_name() {
        assert_eq!(asset_file_name("models/minilm/model.onnx"), "model.onnx");
        assert_eq!(asset_file_name("tokenizer.json"), "tokenizer.json");
        assert_eq!(asset_file_name("assets\\tok.json"), "tok.json");
    }

    #[tokio::test]
    async fn test_copy_to() {
        let bundle = TempDir::new().unwrap();
        std::fs::create_dir_all(bundle.path().join("minilm")).unwrap();
        std::fs::write(bundle.path().join("minilm/model.onnx"), b"onnx-bytes").unwrap();

        let out = TempDir::new().unwrap();
        let dest = out.path().join("model.onnx");
        let assets = DirectoryAssets::new(bundle.path());

        let copied = assets.copy_to("minilm/model.onnx", &dest).await.unwrap();
        assert_eq!(copied, 10);
        assert_eq!(std::fs::read(&dest).unwrap(), b"onnx-bytes");
    }

    #[tokio::test]
    async fn test_missing_asset() {
        let bundle = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let assets = DirectoryAssets::new(bundle.path());

        let result = assets.copy_to("nope.onnx", &out.path().join("nope.onnx")).await;
        assert!(matches!(result, Err(CacheError::Asset(_))));
    }

    #[tokio::test]
    async fn test_escaping_reference_rejected() {
        let bundle = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let assets = DirectoryAssets::new(bundle.path());

        for asset_ref in ["../secret", "/etc/passwd", ""] {
            let result = assets.copy_to(asset_ref, &out.path().join("x")).await;
            assert!(matches!(result, Err(CacheError::Asset(_))), "{asset_ref}");
        }
    }
}
