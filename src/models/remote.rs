//! Hub metadata and file selection
//!
//! The hub publishes a model's files at
//! `{endpoint}/api/models/{model_id}/revision/{revision}` as a JSON document
//! with a `siblings` array of `{"rfilename": ...}` entries, and serves each
//! file from `{endpoint}/{model_id}/resolve/{revision}/{filename}`.

use crate::error::{CacheError, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;

/// Preferred model file locations, in priority order
const EXACT_MODEL_FILES: &[&str] = &["onnx/model.onnx", "model.onnx"];

/// Extensions recognized as model binaries
const MODEL_EXTENSIONS: &[&str] = &[".onnx", ".ort"];

/// Subfolder where exporters put ONNX graphs
const CANONICAL_SUBFOLDER: &str = "onnx/";

const QUANTIZATION_MARKERS: &[&str] = &["q4", "int8", "quant"];

const TOKENIZER_FILE: &str = "tokenizer.json";

/// Suffix appended to a model file name to find its external data shard
pub const EXTERNAL_DATA_SUFFIX: &str = "_data";

#[derive(Deserialize)]
struct ModelInfoResponse {
    siblings: Vec<Sibling>,
}

#[derive(Deserialize)]
struct Sibling {
    rfilename: String,
}

/// Build the shared HTTP client, attaching `Authorization: Bearer` to every
/// request when a token is given
pub fn build_client(token: Option<&str>) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    if let Some(token) = token {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| CacheError::Config(format!("Invalid hub token: {e}")))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    reqwest::Client::builder()
        .default_headers(headers)
        .user_agent(concat!("model-cache/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| CacheError::Config(format!("Failed to build HTTP client: {e}")))
}

/// Client for the hub's metadata and resolve endpoints
#[derive(Debug, Clone)]
pub struct HubClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HubClient {
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    /// Shared HTTP client
    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// Metadata URL for a model revision
    #[must_use]
    pub fn metadata_url(&self, model_id: &str, revision: &str) -> String {
        format!("{}/api/models/{model_id}/revision/{revision}", self.endpoint)
    }

    /// Download URL for one file of a model revision
    #[must_use]
    pub fn file_url(&self, model_id: &str, revision: &str, filename: &str) -> String {
        format!("{}/{model_id}/resolve/{revision}/{filename}", self.endpoint)
    }

    /// Fetch the names of all files published for a model, in listing order
    pub async fn list_files(&self, model_id: &str, revision: &str) -> Result<Vec<String>> {
        let url = self.metadata_url(model_id, revision);
        tracing::debug!("Fetching file listing from {url}");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CacheError::network(&url, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CacheError::Resolution {
                url,
                status: Some(status.as_u16()),
                message: format!("metadata request failed: {}", body.trim()),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| CacheError::network(&url, &e))?;
        let info: ModelInfoResponse =
            serde_json::from_str(&body).map_err(|e| CacheError::Resolution {
                url: url.clone(),
                status: Some(status.as_u16()),
                message: format!("unparseable metadata: {e}"),
            })?;

        let files: Vec<String> = info.siblings.into_iter().map(|s| s.rfilename).collect();
        tracing::debug!("{model_id}@{revision} lists {} files", files.len());
        Ok(files)
    }
}

/// Rank a candidate model file; lower is better
fn model_file_score(name: &str) -> i32 {
    let mut score = 0;
    if name.contains(CANONICAL_SUBFOLDER) {
        score -= 3;
    }
    if name.contains("model") {
        score -= 2;
    }
    if name.contains("fp16") {
        score += 2;
    }
    if QUANTIZATION_MARKERS.iter().any(|m| name.contains(m)) {
        score += 5;
    }
    score
}

/// Pick the model binary from a file listing
///
/// An exact `onnx/model.onnx` or `model.onnx` wins. Otherwise every file with
/// a model extension is scored by [`model_file_score`] and the lowest score is
/// chosen; equal scores keep listing order, so `["model_fp16.onnx",
/// "encoder.onnx"]` (both 0) resolves to `model_fp16.onnx`.
pub fn select_model_file(files: &[String]) -> Result<String> {
    for exact in EXACT_MODEL_FILES {
        if files.iter().any(|f| f == exact) {
            return Ok((*exact).to_string());
        }
    }

    let mut candidates: Vec<&String> = files
        .iter()
        .filter(|f| MODEL_EXTENSIONS.iter().any(|ext| f.ends_with(ext)))
        .collect();
    // sort_by_key is stable, ties keep listing order
    candidates.sort_by_key(|f| model_file_score(f));

    candidates
        .first()
        .map(|f| (*f).clone())
        .ok_or_else(|| CacheError::ModelFilesMissing("no ONNX model file in listing".to_string()))
}

/// Pick the tokenizer file from a file listing
pub fn select_tokenizer_file(files: &[String]) -> Result<String> {
    files
        .iter()
        .find(|f| *f == TOKENIZER_FILE)
        .or_else(|| files.iter().find(|f| f.ends_with(TOKENIZER_FILE)))
        .cloned()
        .ok_or_else(|| CacheError::ModelFilesMissing("no tokenizer.json in listing".to_string()))
}

/// External data shard for a model file, if the listing has one
#[must_use]
pub fn external_data_file(files: &[String], model_file: &str) -> Option<String> {
    let candidate = format!("{model_file}{EXTERNAL_DATA_SUFFIX}");
    files.iter().find(|f| **f == candidate).cloned()
}

/// Remote files chosen for a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFiles {
    pub model: String,
    pub tokenizer: String,
    pub external_data: Option<String>,
}

/// Apply explicit overrides and the selection rules to a listing
///
/// Overrides are taken verbatim, without checking the listing.
pub fn resolve_files(
    files: &[String],
    model_override: Option<&str>,
    tokenizer_override: Option<&str>,
    include_external_data: bool,
) -> Result<ResolvedFiles> {
    let model = match model_override {
        Some(name) => name.to_string(),
        None => select_model_file(files)?,
    };
    let tokenizer = match tokenizer_override {
        Some(name) => name.to_string(),
        None => select_tokenizer_file(files)?,
    };
    let external_data = if include_external_data {
        external_data_file(files, &model)
    } else {
        None
    };

    Ok(ResolvedFiles {
        model,
        tokenizer,
        external_data,
    })
}
