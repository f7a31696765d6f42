//! HTTP Range request planning module
//!
//! Range header parsing for resumable downloads, compliant with RFC 9110 §14.
//! Only the first range of a multi-range list is honored; the rest are ignored
//! rather than answered with `multipart/byteranges`.

use super::date::parse_http_date;
use hyper::header::{HeaderMap, IF_RANGE, RANGE};

/// Inclusive byte window, always `start <= end <= size - 1`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeWindow {
    pub start: u64,
    pub end: u64,
}

impl RangeWindow {
    /// Window covering a whole non-empty file
    pub const fn whole(size: u64) -> Option<Self> {
        if size == 0 {
            None
        } else {
            Some(Self {
                start: 0,
                end: size - 1,
            })
        }
    }

    /// Number of bytes in the window
    #[inline]
    pub const fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value, e.g. `bytes 0-99/1000`
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{size}", self.start, self.end)
    }
}

/// Range planning result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// No usable range: serve the whole file with 200
    Whole,
    /// Serve the window with 206
    Partial(RangeWindow),
    /// 416 with `Content-Range: bytes */size`
    Unsatisfiable,
}

/// Plan the byte range for a request
///
/// A `Range` header is only honored when `If-Range` is absent or names the
/// file's exact modification second. Entity-tag `If-Range` values never match
/// because no entity tags are generated.
///
/// # Arguments
/// * `size` - File size in bytes
/// * `modified_secs` - File modification time in whole Unix seconds
/// * `headers` - Request headers
///
/// # Examples
/// ```
/// use hyper::header::{HeaderMap, HeaderValue, RANGE};
/// use serve_files::http::range::{plan, RangeOutcome, RangeWindow};
///
/// let mut headers = HeaderMap::new();
/// headers.insert(RANGE, HeaderValue::from_static("bytes=-1"));
/// assert_eq!(
///     plan(10, 0, &headers),
///     RangeOutcome::Partial(RangeWindow { start: 9, end: 9 })
/// );
/// ```
pub fn plan(size: u64, modified_secs: i64, headers: &HeaderMap) -> RangeOutcome {
    let Some(range) = headers.get(RANGE).and_then(|v| v.to_str().ok()) else {
        return RangeOutcome::Whole;
    };

    if let Some(if_range) = headers.get(IF_RANGE) {
        let matches = if_range
            .to_str()
            .ok()
            .is_some_and(|value| if_range_matches(value, modified_secs));
        if !matches {
            return RangeOutcome::Whole;
        }
    }

    parse_range(range, size)
}

fn if_range_matches(value: &str, modified_secs: i64) -> bool {
    let value = value.trim();
    if value.starts_with('"') || value.starts_with("W/") {
        return false;
    }
    parse_http_date(value) == Some(modified_secs)
}

/// Parse a `Range` header value against a file size
///
/// Supported forms of the first range element:
/// - `bytes=start-end` - Specific range, end clamped to the last byte
/// - `bytes=start-` - From start to end of file
/// - `bytes=-suffix` - Last suffix bytes
///
/// Malformed values and other units are ignored (`Whole`).
pub fn parse_range(value: &str, size: u64) -> RangeOutcome {
    let Some(specs) = value.trim().strip_prefix("bytes=") else {
        return RangeOutcome::Whole; // Not bytes unit, ignore
    };

    // Multi-range lists are reduced to their first element
    let first = specs.split(',').next().unwrap_or_default().trim();

    let Some((start_str, end_str)) = first.split_once('-') else {
        return RangeOutcome::Whole;
    };
    let (start_str, end_str) = (start_str.trim(), end_str.trim());

    let bounds = if start_str.is_empty() {
        parse_suffix(end_str, size)
    } else {
        parse_standard(start_str, end_str, size)
    };

    let Some((start, end)) = bounds else {
        return RangeOutcome::Whole;
    };

    // Any window against an empty file is unsatisfiable
    if size == 0 || end < start {
        return RangeOutcome::Unsatisfiable;
    }

    RangeOutcome::Partial(RangeWindow { start, end })
}

/// Suffix range (e.g. "-500"); a suffix longer than the file selects all of it
fn parse_suffix(suffix_str: &str, size: u64) -> Option<(u64, u64)> {
    let suffix = suffix_str.parse::<u64>().ok()?;
    // "-0" yields start = size, which fails the end >= start check
    Some((size.saturating_sub(suffix), size.saturating_sub(1)))
}

/// Standard range (e.g. "0-99" or "100-")
fn parse_standard(start_str: &str, end_str: &str, size: u64) -> Option<(u64, u64)> {
    let start = start_str.parse::<u64>().ok()?;
    let last = size.saturating_sub(1);

    let end = if end_str.is_empty() {
        last
    } else {
        end_str.parse::<u64>().ok()?.min(last)
    };

    Some((start, end))
}
