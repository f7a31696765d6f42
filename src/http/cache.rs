//! HTTP cache control module
//!
//! Builds the `Cache-Control` / `Expires` / `Pragma` triple appended to every
//! file response, independent of its status.

use super::date::{format_http_date, unix_seconds};
use hyper::header::{HeaderMap, HeaderValue, CACHE_CONTROL, EXPIRES, PRAGMA};
use std::time::SystemTime;

/// Cache control policy derived from the configured cache time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CachePolicy {
    /// Long-lived private cache for the given number of seconds
    Immutable(i64),
    /// Explicit no-store directives
    #[default]
    NoStore,
}

impl CachePolicy {
    /// Policy for a configured cache time; anything up to one second disables caching
    pub const fn from_seconds(cache_time_seconds: i64) -> Self {
        if cache_time_seconds > 1 {
            Self::Immutable(cache_time_seconds)
        } else {
            Self::NoStore
        }
    }

    /// Convert to Cache-Control header value
    pub fn to_header_value(self) -> String {
        match self {
            Self::Immutable(max_age) => format!("private, immutable, max-age={max_age}"),
            Self::NoStore => "no-cache, no-store, must-revalidate".to_string(),
        }
    }

    /// Append the caching headers, replacing any previous values
    ///
    /// # Arguments
    /// * `headers` - Response headers to extend
    /// * `now` - Reference time for `Expires`
    pub fn apply(self, headers: &mut HeaderMap, now: SystemTime) {
        if let Ok(value) = HeaderValue::from_str(&self.to_header_value()) {
            headers.insert(CACHE_CONTROL, value);
        }

        match self {
            Self::Immutable(max_age) => {
                let expires = format_http_date(unix_seconds(now).saturating_add(max_age));
                if let Ok(value) = HeaderValue::from_str(&expires) {
                    headers.insert(EXPIRES, value);
                }
                headers.remove(PRAGMA);
            }
            Self::NoStore => {
                headers.insert(EXPIRES, HeaderValue::from_static("0"));
                headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
            }
        }
    }
}
