//! HTTP response building module
//!
//! Header composition per outcome plus the plain-text error responses. Every
//! header set here is body-determining; caching headers are appended
//! separately by [`super::cache::CachePolicy`].

use super::body::FileBody;
use super::conditional::EarlyResult;
use super::date::format_http_date;
use super::range::{RangeOutcome, RangeWindow};
use crate::error::ServeError;
use hyper::header::{
    HeaderMap, HeaderValue, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE,
    LAST_MODIFIED,
};
use hyper::{Response, StatusCode};

/// Final decision for a request that reached a regular file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    NotModified,
    PreconditionFailed,
    Unsatisfiable,
    Whole,
    Partial(RangeWindow),
}

impl Disposition {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotModified => StatusCode::NOT_MODIFIED,
            Self::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            Self::Unsatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Whole => StatusCode::OK,
            Self::Partial(_) => StatusCode::PARTIAL_CONTENT,
        }
    }

    /// Byte window to transfer, if this outcome carries data
    pub const fn window(&self, size: u64) -> Option<RangeWindow> {
        match self {
            Self::Whole => RangeWindow::whole(size),
            Self::Partial(window) => Some(*window),
            Self::NotModified | Self::PreconditionFailed | Self::Unsatisfiable => None,
        }
    }
}

impl From<EarlyResult> for Disposition {
    fn from(early: EarlyResult) -> Self {
        match early {
            EarlyResult::NotModified => Self::NotModified,
            EarlyResult::PreconditionFailed => Self::PreconditionFailed,
        }
    }
}

impl From<RangeOutcome> for Disposition {
    fn from(outcome: RangeOutcome) -> Self {
        match outcome {
            RangeOutcome::Whole => Self::Whole,
            RangeOutcome::Partial(window) => Self::Partial(window),
            RangeOutcome::Unsatisfiable => Self::Unsatisfiable,
        }
    }
}

/// Compose the body-determining headers for a disposition
///
/// `Last-Modified` is always present. `Content-Type` is set once range
/// planning ran (200/206/416), `Content-Range` for 206 and 416.
///
/// # Arguments
/// * `disposition` - Outcome of conditional evaluation and range planning
/// * `size` - File size in bytes
/// * `modified_secs` - File modification time in whole Unix seconds
/// * `content_type` - Value from the MIME lookup
pub fn compose_headers(
    disposition: Disposition,
    size: u64,
    modified_secs: i64,
    content_type: &str,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert(&mut headers, LAST_MODIFIED, &format_http_date(modified_secs));

    match disposition {
        Disposition::NotModified | Disposition::PreconditionFailed => {}
        Disposition::Unsatisfiable => {
            insert(&mut headers, CONTENT_TYPE, content_type);
            insert(&mut headers, CONTENT_RANGE, &format!("bytes */{size}"));
            headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        }
        Disposition::Whole => {
            insert(&mut headers, CONTENT_TYPE, content_type);
            headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
            headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        }
        Disposition::Partial(window) => {
            insert(&mut headers, CONTENT_TYPE, content_type);
            headers.insert(CONTENT_LENGTH, HeaderValue::from(window.len()));
            insert(&mut headers, CONTENT_RANGE, &window.content_range(size));
            headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        }
    }

    headers
}

fn insert(headers: &mut HeaderMap, name: hyper::header::HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(e) => crate::logger::log_warning(&format!("Dropping invalid {name} header: {e}")),
    }
}

/// Assemble a response from already composed parts
pub fn build_response(status: StatusCode, headers: HeaderMap, body: FileBody) -> Response<FileBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Build a plain-text error response (403/404/500)
pub fn build_error_response(err: &ServeError, is_head: bool) -> Response<FileBody> {
    let status = err.status();
    let text = format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Error")
    );
    let body = if is_head {
        FileBody::empty()
    } else {
        FileBody::full(text.clone())
    };

    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain")
        .header(CONTENT_LENGTH, text.len())
        .body(body)
        .unwrap_or_else(|e| {
            log_build_error(status.as_str(), &e);
            build_response(status, HeaderMap::new(), FileBody::empty())
        })
}

/// Log response build error
fn log_build_error(status: &str, error: &hyper::http::Error) {
    crate::logger::log_error(&format!("Failed to build {status} response: {error}"));
}
