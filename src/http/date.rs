//! HTTP date module
//!
//! Formats and parses HTTP-date values (RFC 9110 §5.6.7). HTTP dates carry no
//! sub-second precision, so everything here works in whole Unix seconds.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";
const RFC_850: &str = "%A, %d-%b-%y %H:%M:%S GMT";
const ASCTIME: &str = "%a %b %e %H:%M:%S %Y";

/// Whole seconds since the Unix epoch, truncated; times before the epoch clamp to 0
pub fn unix_seconds(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Format a Unix timestamp as an IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`
pub fn format_http_date(secs: i64) -> String {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
        .format(IMF_FIXDATE)
        .to_string()
}

/// Format a `SystemTime` as an IMF-fixdate
pub fn format_system_time(time: SystemTime) -> String {
    format_http_date(unix_seconds(time))
}

/// Parse an HTTP-date into Unix seconds
///
/// Accepts the preferred IMF-fixdate plus the obsolete RFC 850 and asctime
/// forms. Returns `None` for anything else; callers treat an unparseable date
/// as if the header were absent.
///
/// # Examples
/// ```
/// use serve_files::http::date::parse_http_date;
/// assert_eq!(parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT"), Some(784_111_777));
/// assert_eq!(parse_http_date("yesterday"), None);
/// ```
pub fn parse_http_date(value: &str) -> Option<i64> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.timestamp());
    }

    [RFC_850, ASCTIME]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc().timestamp())
}
