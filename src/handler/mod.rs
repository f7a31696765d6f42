//! Request handler module
//!
//! [`FileServer`] turns one request into one response by running the stage
//! pipeline in a fixed order:
//!
//! ```text
//! resolve path -> guard + stat (or cache lookup) -> conditional evaluation
//!   -> range planning -> header composition -> cache headers -> body pump
//! ```
//!
//! Methods other than `HEAD` are served like `GET`; `HEAD` computes the same
//! headers and skips the body.

pub mod resolve;
pub mod stages;

pub use resolve::FileInfo;
pub use stages::{DirectStages, Stages};

use crate::config::HandlerConfig;
use crate::error::ServeError;
use crate::http::body::{self, Completion, FileBody};
use crate::http::response::{build_error_response, build_response, Disposition};
use crate::http::{conditional, range};
use crate::pool::Pool;
use crate::pump::{FilePump, PumpState};
use hyper::header::HeaderMap;
use hyper::{Method, Request, Response};
use std::future::Future;
use std::sync::Arc;

/// Idle pump states kept for reuse per server
const MAX_IDLE_PUMPS: usize = 256;

/// The parts of a request the pipeline looks at
#[derive(Debug, Clone, Copy)]
pub struct FileRequest<'a> {
    pub method: &'a Method,
    /// Raw path plus optional query
    pub target: &'a str,
    pub headers: &'a HeaderMap,
}

impl<'a> FileRequest<'a> {
    pub fn from_http<B>(req: &'a Request<B>) -> Self {
        let uri = req.uri();
        Self {
            method: req.method(),
            target: uri.path_and_query().map_or(uri.path(), |pq| pq.as_str()),
            headers: req.headers(),
        }
    }

    fn is_head(&self) -> bool {
        *self.method == Method::HEAD
    }
}

/// Static file responder over a stage set
pub struct FileServer<S: Stages = DirectStages> {
    config: Arc<HandlerConfig>,
    stages: S,
    pumps: Arc<Pool<PumpState>>,
}

impl<S: Stages> FileServer<S> {
    pub fn new(config: HandlerConfig, stages: S) -> Self {
        Self {
            config: Arc::new(config),
            stages,
            pumps: PumpState::pool(MAX_IDLE_PUMPS),
        }
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Build the response for one request
    ///
    /// Never fails: errors become 403/404/500 responses carrying the same
    /// caching headers as any other response. `completion` fires after the
    /// last body byte has been handed to the connection, with the final
    /// status and the delivered byte count; it does not fire when the body
    /// is dropped early.
    pub async fn serve(
        &self,
        request: &FileRequest<'_>,
        completion: Option<Completion>,
    ) -> Response<FileBody> {
        let mut response = match self.respond(request).await {
            Ok(response) => response,
            Err(err) => {
                let mut response = build_error_response(&err, request.is_head());
                self.stages
                    .append_cache_headers(&self.config, response.headers_mut());
                response
            }
        };

        if let Some(completion) = completion {
            let status = response.status();
            response.body_mut().on_complete(status, completion);
        }
        response
    }

    /// [`FileServer::serve`] for a hyper request
    pub fn handle<'a, B>(
        &'a self,
        req: &'a Request<B>,
        completion: Option<Completion>,
    ) -> impl Future<Output = Response<FileBody>> + Send + 'a {
        let request = FileRequest::from_http(req);
        async move { self.serve(&request, completion).await }
    }

    async fn respond(&self, request: &FileRequest<'_>) -> Result<Response<FileBody>, ServeError> {
        let config = &*self.config;
        let path = self.stages.resolve_path(config, request.target)?;
        let (info, source) = self.stages.file_info(config, &path).await?;

        let modified = info.modified_secs();
        let disposition = conditional::evaluate(modified, request.headers).map_or_else(
            || Disposition::from(range::plan(info.len, modified, request.headers)),
            Disposition::from,
        );
        let status = disposition.status();

        let mut headers = self.stages.compose_headers(&path, &info, disposition);
        self.stages.append_cache_headers(config, &mut headers);

        let window = disposition
            .window(info.len)
            .filter(|_| !request.is_head());
        let Some(window) = window else {
            // Header-only response; dropping `source` releases any lease
            return Ok(build_response(status, headers, FileBody::empty()));
        };

        let source = self.stages.open_source(&path, source).await?;
        let (sink, body) = body::channel(window.len());
        self.stages
            .send_body(FilePump::new(&self.pumps, source, window), sink);

        Ok(build_response(status, headers, body))
    }
}
