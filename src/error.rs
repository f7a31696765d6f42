//! Error taxonomy
//!
//! Filesystem failures are normalized into these variants at the resolver and
//! descriptor cache boundary; nothing above that boundary sees raw OS errors.

use hyper::StatusCode;
use std::path::PathBuf;

/// Errors produced while turning a request into a file response
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServeError {
    /// Path escapes the document root, is a disallowed symlink, or is not a regular file
    #[error("access denied")]
    AccessDenied,

    /// Stat/open failed for any other reason
    #[error("file not found")]
    NotFound,

    /// Failure after the response head was committed
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// Internal failure, e.g. a cache-consistency violation
    #[error("internal error: {0}")]
    Internal(String),

    /// The configured document root could not be canonicalized
    #[error("invalid document root '{}': {reason}", .path.display())]
    DocumentRoot { path: PathBuf, reason: String },
}

impl ServeError {
    /// HTTP status code reported for this error
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::AccessDenied => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Transfer(_) | Self::Internal(_) | Self::DocumentRoot { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
