//! In-process hub emulator for download and pull tests

#![allow(dead_code)]

use axum::body::{Body, Bytes};
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use rand::Rng;
use std::sync::{Arc, Mutex};

/// Misbehavior injected into file responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fault {
    #[default]
    None,
    /// Answer the range starting at this offset with a 500
    FailRange(u64),
    /// Cut the range starting at this offset off halfway through the body
    TruncateRange(u64),
    /// Ignore `Range` and always send the full file with a 200
    IgnoreRanges,
}

/// One request as seen by the hub
#[derive(Debug, Clone)]
pub struct RequestLog {
    pub path: String,
    pub range: Option<String>,
    pub authorization: Option<String>,
}

struct Inner {
    model_id: String,
    files: Mutex<Vec<(String, Vec<u8>)>>,
    fault: Mutex<Fault>,
    listing_status: Mutex<Option<StatusCode>>,
    log: Mutex<Vec<RequestLog>>,
}

/// Serves one model's listing and files
#[derive(Clone)]
pub struct MockHub {
    inner: Arc<Inner>,
}

impl MockHub {
    pub fn new(model_id: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                model_id: model_id.to_string(),
                files: Mutex::new(Vec::new()),
                fault: Mutex::new(Fault::None),
                listing_status: Mutex::new(None),
                log: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Publish a file; it is listed in insertion order
    pub fn add_file(&self, name: &str, data: Vec<u8>) {
        self.inner
            .files
            .lock()
            .unwrap()
            .push((name.to_string(), data));
    }

    pub fn set_fault(&self, fault: Fault) {
        *self.inner.fault.lock().unwrap() = fault;
    }

    /// Answer listing requests with this status instead of the listing
    pub fn fail_listing(&self, status: StatusCode) {
        *self.inner.listing_status.lock().unwrap() = Some(status);
    }

    pub fn requests(&self) -> Vec<RequestLog> {
        self.inner.log.lock().unwrap().clone()
    }

    /// Requests for a file path ending in `name`
    pub fn file_requests(&self, name: &str) -> Vec<RequestLog> {
        self.requests()
            .into_iter()
            .filter(|r| r.path.contains("/resolve/") && r.path.ends_with(name))
            .collect()
    }

    /// Bind to an ephemeral port and serve in the background
    pub async fn spawn(&self) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new()
            .route("/{*path}", get(handle))
            .with_state(self.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{addr}")
    }

    fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.inner
            .files
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.clone())
    }

    fn listing(&self, rest: &str) -> Response {
        if let Some(status) = *self.inner.listing_status.lock().unwrap() {
            return (status, "listing unavailable").into_response();
        }
        let Some((model_id, _revision)) = rest.split_once("/revision/") else {
            return StatusCode::NOT_FOUND.into_response();
        };
        if model_id != self.inner.model_id {
            return (StatusCode::NOT_FOUND, "Repository not found").into_response();
        }

        let siblings: Vec<_> = self
            .inner
            .files
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| serde_json::json!({ "rfilename": name }))
            .collect();
        Json(serde_json::json!({ "id": model_id, "siblings": siblings })).into_response()
    }
}

async fn handle(
    State(hub): State<MockHub>,
    UrlPath(path): UrlPath<String>,
    headers: HeaderMap,
) -> Response {
    let path = path.trim_start_matches('/').to_string();
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    hub.inner.log.lock().unwrap().push(RequestLog {
        path: path.clone(),
        range: range.clone(),
        authorization: headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    });

    if let Some(rest) = path.strip_prefix("api/models/") {
        return hub.listing(rest);
    }

    let Some((model_id, rest)) = path.split_once("/resolve/") else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some((_revision, name)) = rest.split_once('/') else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if model_id != hub.inner.model_id {
        return StatusCode::NOT_FOUND.into_response();
    }
    let Some(data) = hub.file(name) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let fault = *hub.inner.fault.lock().unwrap();
    match range.as_deref().and_then(|r| parse_range(r, data.len() as u64)) {
        Some(_) if fault == Fault::IgnoreRanges => (StatusCode::OK, data).into_response(),
        Some((start, end)) => serve_range(&data, start, end, fault),
        None => (StatusCode::OK, data).into_response(),
    }
}

fn serve_range(data: &[u8], start: u64, end: u64, fault: Fault) -> Response {
    let content_range = format!("bytes {start}-{end}/{}", data.len());
    let slice = data[start as usize..=end as usize].to_vec();

    match fault {
        Fault::FailRange(at) if at == start => {
            (StatusCode::INTERNAL_SERVER_ERROR, "worker fault").into_response()
        }
        Fault::TruncateRange(at) if at == start => {
            let half = Bytes::from(slice[..slice.len() / 2].to_vec());
            let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
                Ok(half),
                Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection dropped",
                )),
            ];
            let body = Body::from_stream(futures_util::stream::iter(chunks));
            (
                StatusCode::PARTIAL_CONTENT,
                [(header::CONTENT_RANGE, content_range)],
                body,
            )
                .into_response()
        }
        _ => (
            StatusCode::PARTIAL_CONTENT,
            [(header::CONTENT_RANGE, content_range)],
            slice,
        )
            .into_response(),
    }
}

/// Parse `bytes=start-end`, clamping `end` to the file
fn parse_range(value: &str, len: u64) -> Option<(u64, u64)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end: u64 = end.parse().ok()?;
    if start > end || start >= len {
        return None;
    }
    Some((start, end.min(len - 1)))
}

/// Random payload of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill(&mut data[..]);
    data
}

/// Files left in a directory, sorted
pub fn dir_entries(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
