//! Pluggable pipeline stages
//!
//! The orchestrator only talks to a [`Stages`] implementation. Defaults cover
//! the pure stages (path resolution, header composition, caching headers,
//! body transmission); the filesystem-facing ones are supplied by the
//! implementation, which is how the descriptor cache swaps in without
//! touching callers.

use super::resolve::{guard_and_stat, resolve, FileInfo};
use crate::config::HandlerConfig;
use crate::error::ServeError;
use crate::http::body::ChannelSink;
use crate::http::response::{compose_headers, Disposition};
use crate::http::{mime, CachePolicy};
use crate::logger;
use crate::pump::{FilePump, PumpOutcome, PumpSource};
use hyper::header::HeaderMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Stage set driving one [`super::FileServer`]
pub trait Stages: Send + Sync + 'static {
    /// Per-request handle obtained with the file info; kept until the body
    /// source is opened or the response is finished without one
    type Source: Send + 'static;

    /// Map the request target to an absolute path
    fn resolve_path(&self, config: &HandlerConfig, target: &str) -> Result<PathBuf, ServeError> {
        resolve(config, target)
    }

    /// Guard and stat the path
    fn file_info(
        &self,
        config: &HandlerConfig,
        path: &Path,
    ) -> impl Future<Output = Result<(FileInfo, Self::Source), ServeError>> + Send;

    /// Turn the per-request handle into a readable pump source
    fn open_source(
        &self,
        path: &Path,
        source: Self::Source,
    ) -> impl Future<Output = Result<PumpSource, ServeError>> + Send;

    /// Body-determining headers for the outcome
    fn compose_headers(&self, path: &Path, info: &FileInfo, disposition: Disposition) -> HeaderMap {
        compose_headers(
            disposition,
            info.len,
            info.modified_secs(),
            &mime::content_type(path),
        )
    }

    /// `Cache-Control` / `Expires` / `Pragma`, appended to every response
    fn append_cache_headers(&self, config: &HandlerConfig, headers: &mut HeaderMap) {
        CachePolicy::from_seconds(config.cache_time_seconds()).apply(headers, SystemTime::now());
    }

    /// Start streaming the window into the response body
    fn send_body(&self, pump: FilePump, sink: ChannelSink) {
        tokio::spawn(async move {
            let report = pump.run(sink).await;
            if report.outcome != PumpOutcome::Complete {
                logger::log_debug(&format!(
                    "Transfer ended early ({:?}) after {} bytes",
                    report.outcome, report.bytes
                ));
            }
        });
    }
}

/// Stats on every request and opens a fresh descriptor per body
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectStages;

impl Stages for DirectStages {
    type Source = ();

    async fn file_info(
        &self,
        config: &HandlerConfig,
        path: &Path,
    ) -> Result<(FileInfo, Self::Source), ServeError> {
        guard_and_stat(config, path).await.map(|info| (info, ()))
    }

    async fn open_source(&self, path: &Path, _source: ()) -> Result<PumpSource, ServeError> {
        PumpSource::open(path).await.map_err(|e| {
            logger::log_debug(&format!("Open failed for {}: {e}", path.display()));
            ServeError::NotFound
        })
    }
}
