//! Conditional request module
//!
//! Evaluates `If-Modified-Since` and `If-Unmodified-Since` against a file's
//! modification time. Entity tags are not generated, so only date
//! validators are considered.

use super::date::parse_http_date;
use hyper::header::{HeaderMap, IF_MODIFIED_SINCE, IF_UNMODIFIED_SINCE};

/// Early-exit result of conditional evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyResult {
    /// 304: the client's copy is current
    NotModified,
    /// 412: the file changed after the client's timestamp
    PreconditionFailed,
}

fn header_date(headers: &HeaderMap, name: hyper::header::HeaderName) -> Option<i64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
}

/// Evaluate conditional headers
///
/// `If-Modified-Since` is checked first; `If-Unmodified-Since` only when the
/// former did not trigger. Unparseable dates are ignored.
///
/// # Arguments
/// * `modified_secs` - File modification time in whole Unix seconds
/// * `headers` - Request headers
///
/// # Returns
/// `None` when the request should proceed to range planning
pub fn evaluate(modified_secs: i64, headers: &HeaderMap) -> Option<EarlyResult> {
    if let Some(since) = header_date(headers, IF_MODIFIED_SINCE) {
        if modified_secs <= since {
            return Some(EarlyResult::NotModified);
        }
    }

    if let Some(since) = header_date(headers, IF_UNMODIFIED_SINCE) {
        if modified_secs >= since {
            return Some(EarlyResult::PreconditionFailed);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::date::format_http_date;
    use hyper::header::HeaderValue;

    const MTIME: i64 = 1_700_000_000;

    fn headers(name: hyper::header::HeaderName, secs: i64) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(
            name,
            HeaderValue::from_str(&format_http_date(secs)).unwrap(),
        );
        map
    }

    #[test]
    fn test_no_conditions() {
        assert_eq!(evaluate(MTIME, &HeaderMap::new()), None);
    }

    #[test]
    fn test_not_modified() {
        assert_eq!(
            evaluate(MTIME, &headers(IF_MODIFIED_SINCE, MTIME)),
            Some(EarlyResult::NotModified)
        );
        assert_eq!(
            evaluate(MTIME, &headers(IF_MODIFIED_SINCE, MTIME + 60)),
            Some(EarlyResult::NotModified)
        );
        assert_eq!(evaluate(MTIME, &headers(IF_MODIFIED_SINCE, MTIME - 1)), None);
    }

    #[test]
    fn test_precondition_failed() {
        assert_eq!(
            evaluate(MTIME, &headers(IF_UNMODIFIED_SINCE, MTIME)),
            Some(EarlyResult::PreconditionFailed)
        );
        assert_eq!(
            evaluate(MTIME, &headers(IF_UNMODIFIED_SINCE, MTIME - 60)),
            Some(EarlyResult::PreconditionFailed)
        );
        assert_eq!(
            evaluate(MTIME, &headers(IF_UNMODIFIED_SINCE, MTIME + 1)),
            None
        );
    }

    #[test]
    fn test_modified_since_checked_first() {
        let mut map = headers(IF_MODIFIED_SINCE, MTIME);
        map.insert(
            IF_UNMODIFIED_SINCE,
            HeaderValue::from_str(&format_http_date(MTIME)).unwrap(),
        );
        assert_eq!(evaluate(MTIME, &map), Some(EarlyResult::NotModified));
    }

    #[test]
    fn test_invalid_date_ignored() {
        let mut map = HeaderMap::new();
        map.insert(IF_MODIFIED_SINCE, HeaderValue::from_static("garbage"));
        assert_eq!(evaluate(MTIME, &map), None);
    }
}
