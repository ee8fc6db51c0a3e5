use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

/// File name of the per-model manifest
pub const MANIFEST_FILE: &str = "model.json";

/// Key under `extraFiles` for the external data shard
pub const EXTERNAL_DATA_KEY: &str = "externalData";

/// Where a cached model came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelSource {
    Asset,
    #[default]
    Remote,
}

impl ModelSource {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "asset" => Some(Self::Asset),
            "remote" => Some(Self::Remote),
            _ => None,
        }
    }
}

/// Record describing one cached model, stored as `model.json` in its directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub model_id: String,
    pub source: ModelSource,
    pub model_file_name: String,
    pub tokenizer_file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default)]
    pub extra_files: BTreeMap<String, String>,
    #[serde(default)]
    pub downloaded_at: String,
}

impl CacheEntry {
    /// Create a new entry stamped with the current time
    #[must_use]
    pub fn new(
        model_id: &str,
        source: ModelSource,
        model_file_name: &str,
        tokenizer_file_name: &str,
    ) -> Self {
        Self {
            model_id: model_id.to_string(),
            source,
            model_file_name: model_file_name.to_string(),
            tokenizer_file_name: tokenizer_file_name.to_string(),
            revision: None,
            extra_files: BTreeMap::new(),
            downloaded_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// File name of the external data shard, if one was cached
    #[must_use]
    pub fn external_data_file(&self) -> Option<&str> {
        self.extra_files.get(EXTERNAL_DATA_KEY).map(String::as_str)
    }

    /// Load an entry from a manifest file
    ///
    /// Missing or mistyped fields fall back to their defaults. Only a file that
    /// cannot be read or is not a JSON object is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| CacheError::fs(path, e))?;
        Self::parse(&content)
    }

    /// Parse manifest content, strict first and field-by-field on failure
    pub fn parse(content: &str) -> Result<Self> {
        if let Ok(entry) = serde_json::from_str::<Self>(content) {
            return Ok(entry);
        }

        let value: Value = serde_json::from_str(content)
            .map_err(|e| CacheError::Manifest(format!("Failed to parse manifest: {e}")))?;
        let Value::Object(fields) = value else {
            return Err(CacheError::Manifest(
                "Manifest is not a JSON object".to_string(),
            ));
        };

        tracing::debug!("Manifest failed strict decode, filling defaults");

        let string = |key: &str| {
            fields
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let extra_files = fields
            .get("extraFiles")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            model_id: string("modelId"),
            source: fields
                .get("source")
                .and_then(Value::as_str)
                .and_then(ModelSource::parse)
                .unwrap_or_default(),
            model_file_name: string("modelFileName"),
            tokenizer_file_name: string("tokenizerFileName"),
            revision: fields
                .get("revision")
                .and_then(Value::as_str)
                .map(str::to_string),
            extra_files,
            downloaded_at: string("downloadedAt"),
        })
    }

    /// Save entry to file atomically (tmp + rename), flushed before returning
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CacheError::fs(parent, e))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| CacheError::Manifest(format!("Failed to serialize manifest: {e}")))?;

        let tmp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_path).map_err(|e| CacheError::fs(&tmp_path, e))?;
        file.write_all(content.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| CacheError::fs(&tmp_path, e))?;
        drop(file);

        fs::rename(&tmp_path, path).map_err(|e| CacheError::fs(path, e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_entry() -> CacheEntry {
        let mut entry = CacheEntry::new(
            "acme/tiny-embed",
            ModelSource::Remote,
            "model.onnx",
            "tokenizer.json",
        );
        entry.revision = Some("main".to_string());
        entry
            .extra_files
            .insert(EXTERNAL_DATA_KEY.to_string(), "model.onnx_data".to_string());
        entry
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(MANIFEST_FILE);

        let entry = sample_entry();
        entry.save(&path).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = CacheEntry::load(&path).unwrap();
        assert_eq!(loaded, entry);
        assert_eq!(loaded.external_data_file(), Some("model.onnx_data"));
    }

    #[test]
    fn test_serialized_keys_are_camel_case() {
        let json = serde_json::to_value(sample_entry()).unwrap();
        assert_eq!(json["modelId"], "acme/tiny-embed");
        assert_eq!(json["source"], "remote");
        assert_eq!(json["modelFileName"], "model.onnx");
        assert_eq!(json["tokenizerFileName"], "tokenizer.json");
        assert_eq!(json["extraFiles"]["externalData"], "model.onnx_data");
    }

    #[test]
    fn test_missing_fields_default() {
        let entry = CacheEntry::parse(r#"{"modelId": "acme/tiny-embed"}"#).unwrap();
        assert_eq!(entry.model_id, "acme/tiny-embed");
        assert_eq!(entry.model_file_name, "");
        assert_eq!(entry.tokenizer_file_name, "");
        assert_eq!(entry.source, ModelSource::Remote);
        assert!(entry.revision.is_none());
        assert!(entry.extra_files.is_empty());
    }

    #[test]
    fn test_mistyped_fields_default() {
        let entry = CacheEntry::parse(
            r#"{"modelId": 7, "source": "asset", "modelFileName": "m.onnx",
                "tokenizerFileName": null, "extraFiles": ["nope"]}"#,
        )
        .unwrap();
        assert_eq!(entry.model_id, "");
        assert_eq!(entry.source, ModelSource::Asset);
        assert_eq!(entry.model_file_name, "m.onnx");
        assert_eq!(entry.tokenizer_file_name, "");
        assert!(entry.extra_files.is_empty());
    }

    #[test]
    fn test_unknown_source_defaults_to_remote() {
        let entry = CacheEntry::parse(r#"{"source": "sideloaded"}"#).unwrap();
        assert_eq!(entry.source, ModelSource::Remote);
    }

    #[test]
    fn test_non_object_is_error() {
        assert!(matches!(
            CacheEntry::parse("[1, 2, 3]"),
            Err(CacheError::Manifest(_))
        ));
        assert!(matches!(
            CacheEntry::parse("{\"modelId\": \"trunc"),
            Err(CacheError::Manifest(_))
        ));
    }

    #[test]
    fn test_save_overwrites_existing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(MANIFEST_FILE);

        sample_entry().save(&path).unwrap();
        let replacement = CacheEntry::new("acme/other", ModelSource::Asset, "a.onnx", "t.json");
        replacement.save(&path).unwrap();

        assert_eq!(CacheEntry::load(&path).unwrap(), replacement);
    }

    #[test]
    fn test_load_missing_file_is_filesystem_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = CacheEntry::load(&temp_dir.path().join(MANIFEST_FILE));
        assert!(matches!(result, Err(CacheError::Filesystem { .. })));
    }
}
