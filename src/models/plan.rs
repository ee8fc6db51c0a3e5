/// Minimum bytes per range before another connection is worth opening
pub const DEFAULT_PART_SIZE: u64 = 4 * 1024 * 1024;

/// Inclusive byte range `start..=end`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

#[allow(clippy::len_without_is_empty)]
impl ByteRange {
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the `Range` request header
    #[must_use]
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// How a file will be transferred
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadPlan {
    SingleStream,
    /// Two or more contiguous ranges covering the whole file, in order
    Ranged(Vec<ByteRange>),
}

/// What a probe learned about a remote file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoteFileInfo {
    pub content_length: Option<u64>,
    pub supports_byte_ranges: bool,
}

/// Decide between a single stream and a ranged transfer
///
/// Ranged transfers need range support, a known non-zero length and more than
/// one connection. The part count is `ceil(length / part_size)` clamped to
/// `1..=max_connections`; each range is `ceil(length / parts)` bytes with the
/// last one truncated.
#[must_use]
pub fn plan_download(info: RemoteFileInfo, max_connections: usize, part_size: u64) -> DownloadPlan {
    let length = match info.content_length {
        Some(len) if len > 0 => len,
        _ => return DownloadPlan::SingleStream,
    };
    if !info.supports_byte_ranges || max_connections <= 1 {
        return DownloadPlan::SingleStream;
    }

    let part_size = part_size.max(1);
    let max_parts = u64::try_from(max_connections).unwrap_or(u64::MAX);
    let part_count = length.div_ceil(part_size).clamp(1, max_parts);
    if part_count <= 1 {
        return DownloadPlan::SingleStream;
    }

    let chunk = length.div_ceil(part_count);
    let last = length - 1;
    let ranges: Vec<ByteRange> = (0..part_count)
        .map(|i| i * chunk)
        .take_while(|start| *start <= last)
        .map(|start| ByteRange {
            start,
            end: (start + chunk - 1).min(last),
        })
        .collect();

    if ranges.len() < 2 {
        DownloadPlan::SingleStream
    } else {
        DownloadPlan::Ranged(ranges)
    }
}
