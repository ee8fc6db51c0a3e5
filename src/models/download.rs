use crate::error::{CacheError, Result};
use crate::models::plan::{
    plan_download, ByteRange, DownloadPlan, RemoteFileInfo, DEFAULT_PART_SIZE,
};
use futures_util::StreamExt;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinSet;

/// Byte-level progress: `(received_so_far, total_if_known)`
///
/// Ranged transfers call this from several tasks at once; the running total is
/// approximately monotonic but calls may interleave.
pub type ByteProgress = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Per-transfer options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Replace an existing destination instead of skipping the download
    pub overwrite: bool,
    /// Maximum concurrent range requests; 1 means a plain sequential GET
    pub max_connections: usize,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            max_connections: 1,
        }
    }
}

/// How a transfer was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Destination already existed and overwrite was not requested
    Skipped,
    SingleStream,
    Ranged { parts: usize },
    /// A ranged attempt failed and the single-stream retry succeeded
    Fallback,
}

/// Result of a completed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub bytes: u64,
    pub mode: TransferMode,
}

/// Sums cumulative byte counts reported by concurrent range workers
pub struct ProgressAggregator {
    received: Vec<AtomicU64>,
    total: u64,
    callback: Option<ByteProgress>,
}

impl ProgressAggregator {
    #[must_use]
    pub fn new(workers: usize, total: u64, callback: Option<ByteProgress>) -> Self {
        Self {
            received: (0..workers).map(|_| AtomicU64::new(0)).collect(),
            total,
            callback,
        }
    }

    /// Record a worker's cumulative count and report the new sum
    pub fn report(&self, worker: usize, cumulative: u64) {
        if let Some(slot) = self.received.get(worker) {
            slot.store(cumulative, Ordering::SeqCst);
        }
        if let Some(callback) = &self.callback {
            callback(self.received(), Some(self.total));
        }
    }

    /// Sum of all workers' counts
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received.iter().map(|r| r.load(Ordering::SeqCst)).sum()
    }
}

/// File downloader with optional parallel range transfers
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    part_size: u64,
}

impl Downloader {
    /// Create a downloader on a shared HTTP client
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            part_size: DEFAULT_PART_SIZE,
        }
    }

    /// Override the minimum range size used by the planner
    #[must_use]
    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    /// Download `url` to `dest`
    ///
    /// With more than one connection the file is probed and, when the server
    /// honors ranges and the file is large enough, fetched as concurrent
    /// ranges. Any failure of the ranged attempt removes its part files and
    /// retries once as a single stream. The destination only appears once the
    /// transfer is complete.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        options: DownloadOptions,
        progress: Option<ByteProgress>,
    ) -> Result<DownloadOutcome> {
        if !options.overwrite && dest.exists() {
            tracing::debug!("{} exists, skipping download", dest.display());
            return Ok(DownloadOutcome {
                bytes: 0,
                mode: TransferMode::Skipped,
            });
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheError::fs(parent, e))?;
        }

        let plan = if options.max_connections > 1 {
            let info = self.probe(url).await;
            if let Some(length) = info.content_length {
                check_disk_space(dest, length)?;
            }
            plan_download(info, options.max_connections, self.part_size)
        } else {
            DownloadPlan::SingleStream
        };

        match plan {
            DownloadPlan::SingleStream => {
                let bytes = self.download_single(url, dest, progress).await?;
                Ok(DownloadOutcome {
                    bytes,
                    mode: TransferMode::SingleStream,
                })
            }
            DownloadPlan::Ranged(ranges) => {
                let parts = ranges.len();
                tracing::info!("Downloading {url} in {parts} parts");
                match self
                    .download_ranged(url, dest, &ranges, progress.clone())
                    .await
                {
                    Ok(bytes) => Ok(DownloadOutcome {
                        bytes,
                        mode: TransferMode::Ranged { parts },
                    }),
                    Err(e) => {
                        tracing::warn!(
                            "Parallel download of {url} failed ({e}), retrying as a single stream"
                        );
                        let bytes = self.download_single(url, dest, progress).await?;
                        Ok(DownloadOutcome {
                            bytes,
                            mode: TransferMode::Fallback,
                        })
                    }
                }
            }
        }
    }

    /// Probe length and range support with a one-byte range request
    ///
    /// A failed probe reports an unknown length, which plans a single stream.
    pub async fn probe(&self, url: &str) -> RemoteFileInfo {
        let response = match self.client.get(url).header(RANGE, "bytes=0-0").send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Probe of {url} failed: {e}");
                return RemoteFileInfo::default();
            }
        };

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                let total = response
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_content_range)
                    .and_then(|(_, _, total)| total);
                RemoteFileInfo {
                    content_length: total,
                    supports_byte_ranges: total.is_some(),
                }
            }
            status if status.is_success() => RemoteFileInfo {
                content_length: response.content_length(),
                supports_byte_ranges: false,
            },
            status => {
                tracing::warn!("Probe of {url} returned {status}");
                RemoteFileInfo::default()
            }
        }
    }

    /// Plain GET into the staging file, renamed onto `dest` on success
    async fn download_single(
        &self,
        url: &str,
        dest: &Path,
        progress: Option<ByteProgress>,
    ) -> Result<u64> {
        let staging = staging_path(dest);
        match self.fetch_single(url, dest, &staging, progress).await {
            Ok(bytes) => {
                fs::rename(&staging, dest)
                    .await
                    .map_err(|e| CacheError::fs(dest, e))?;
                tracing::debug!("Downloaded {url} ({})", format_bytes(bytes));
                Ok(bytes)
            }
            Err(e) => {
                remove_quietly(&staging).await;
                Err(e)
            }
        }
    }

    async fn fetch_single(
        &self,
        url: &str,
        dest: &Path,
        staging: &Path,
        progress: Option<ByteProgress>,
    ) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CacheError::network(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unexpected_status(url, status, "a successful response"));
        }

        let total = response.content_length();
        if let Some(total) = total {
            check_disk_space(dest, total)?;
        }

        let mut file = File::create(staging)
            .await
            .map_err(|e| CacheError::fs(staging, e))?;
        let mut received = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| CacheError::network(url, &e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| CacheError::fs(staging, e))?;
            received += chunk.len() as u64;
            if let Some(callback) = &progress {
                callback(received, total);
            }
        }

        file.flush().await.map_err(|e| CacheError::fs(staging, e))?;
        file.sync_all().await.map_err(|e| CacheError::fs(staging, e))?;
        Ok(received)
    }

    /// Fetch all ranges concurrently, then concatenate them in order
    ///
    /// All-or-nothing: the first failing worker aborts the rest, and every part
    /// file is removed before returning, on success and on failure.
    async fn download_ranged(
        &self,
        url: &str,
        dest: &Path,
        ranges: &[ByteRange],
        progress: Option<ByteProgress>,
    ) -> Result<u64> {
        let parts: Vec<PathBuf> = (0..ranges.len()).map(|i| part_path(dest, i)).collect();
        let total = ranges.last().map_or(0, |r| r.end + 1);

        let result = self
            .fetch_ranges(url, dest, ranges, &parts, total, progress)
            .await;
        remove_all_quietly(&parts).await;
        result
    }

    async fn fetch_ranges(
        &self,
        url: &str,
        dest: &Path,
        ranges: &[ByteRange],
        parts: &[PathBuf],
        total: u64,
        progress: Option<ByteProgress>,
    ) -> Result<u64> {
        // Parts exist before any worker starts, so an aborted worker can never
        // create one after cleanup.
        for part in parts {
            File::create(part)
                .await
                .map_err(|e| CacheError::fs(part, e))?;
        }

        let aggregator = Arc::new(ProgressAggregator::new(ranges.len(), total, progress));
        let mut workers = JoinSet::new();
        for (index, (range, part)) in ranges.iter().zip(parts).enumerate() {
            workers.spawn(fetch_range(
                self.client.clone(),
                url.to_string(),
                *range,
                part.clone(),
                index,
                Arc::clone(&aggregator),
            ));
        }

        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(CacheError::Network {
                    url: url.to_string(),
                    status: None,
                    message: format!("range worker stopped: {e}"),
                })
            });
            if let Err(e) = result {
                if failure.is_none() {
                    workers.abort_all();
                    failure = Some(e);
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        let staging = staging_path(dest);
        match concatenate(parts, &staging).await {
            Ok(bytes) => {
                fs::rename(&staging, dest)
                    .await
                    .map_err(|e| CacheError::fs(dest, e))?;
                tracing::debug!("Reassembled {url} from {} parts", parts.len());
                Ok(bytes)
            }
            Err(e) => {
                remove_quietly(&staging).await;
                Err(e)
            }
        }
    }
}

/// One range worker: requires a 206 for exactly its range
async fn fetch_range(
    client: reqwest::Client,
    url: String,
    range: ByteRange,
    part: PathBuf,
    index: usize,
    aggregator: Arc<ProgressAggregator>,
) -> Result<()> {
    let response = client
        .get(&url)
        .header(RANGE, range.header_value())
        .send()
        .await
        .map_err(|e| CacheError::network(&url, &e))?;

    let status = response.status();
    if status != StatusCode::PARTIAL_CONTENT {
        return Err(unexpected_status(
            &url,
            status,
            &format!("206 for {}", range.header_value()),
        ));
    }

    let served = response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range);
    if let Some((start, end, _)) = served {
        if start != range.start || end != range.end {
            return Err(CacheError::Network {
                url,
                status: Some(status.as_u16()),
                message: format!(
                    "server sent bytes {start}-{end} for {}",
                    range.header_value()
                ),
            });
        }
    }

    let mut file = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(&part)
        .await
        .map_err(|e| CacheError::fs(&part, e))?;
    let mut received = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| CacheError::network(&url, &e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| CacheError::fs(&part, e))?;
        received += chunk.len() as u64;
        aggregator.report(index, received);
    }
    file.flush().await.map_err(|e| CacheError::fs(&part, e))?;

    if received != range.len() {
        return Err(CacheError::Network {
            url,
            status: Some(status.as_u16()),
            message: format!(
                "range {} ended after {received} of {} bytes",
                range.header_value(),
                range.len()
            ),
        });
    }

    Ok(())
}

/// Append parts in order into `target`
async fn concatenate(parts: &[PathBuf], target: &Path) -> Result<u64> {
    let mut out = File::create(target)
        .await
        .map_err(|e| CacheError::fs(target, e))?;
    let mut written = 0u64;
    for part in parts {
        let mut input = File::open(part)
            .await
            .map_err(|e| CacheError::fs(part, e))?;
        written += tokio::io::copy(&mut input, &mut out)
            .await
            .map_err(|e| CacheError::fs(target, e))?;
    }
    out.flush().await.map_err(|e| CacheError::fs(target, e))?;
    out.sync_all().await.map_err(|e| CacheError::fs(target, e))?;
    Ok(written)
}

fn unexpected_status(url: &str, status: StatusCode, expected: &str) -> CacheError {
    CacheError::Network {
        url: url.to_string(),
        status: Some(status.as_u16()),
        message: format!("expected {expected}, got {status}"),
    }
}

/// Parse `bytes start-end/total` (total may be `*`)
fn parse_content_range(value: &str) -> Option<(u64, u64, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes ")?;
    let (span, total) = rest.split_once('/')?;
    let (start, end) = span.split_once('-')?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?, total))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// In-progress file for a destination
#[must_use]
pub fn staging_path(dest: &Path) -> PathBuf {
    with_suffix(dest, ".download")
}

/// Part file holding range `index` of a destination
#[must_use]
pub fn part_path(dest: &Path, index: usize) -> PathBuf {
    with_suffix(dest, &format!(".part{index}"))
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove {}: {e}", path.display());
        }
    }
}

async fn remove_all_quietly(paths: &[PathBuf]) {
    for path in paths {
        remove_quietly(path).await;
    }
}

/// Check if enough disk space is available next to `dest`
fn check_disk_space(dest: &Path, required: u64) -> Result<()> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let stats = match nix::sys::statvfs::statvfs(dir) {
        Ok(stats) => stats,
        Err(e) => {
            tracing::debug!("Skipping disk space check for {}: {e}", dir.display());
            return Ok(());
        }
    };

    #[allow(clippy::useless_conversion)]
    let available = u64::from(stats.blocks_available()) * u64::from(stats.fragment_size());

    if available < required {
        return Err(CacheError::InsufficientSpace {
            required,
            available,
        });
    }

    Ok(())
}

/// Format bytes as human-readable string
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
