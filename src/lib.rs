//! Static file HTTP response engine
//!
//! Resolves request targets under a document root, answers conditional and
//! range requests, and streams file bytes through pooled pumps. Open
//! descriptors can be kept warm across requests by the descriptor cache.
//!
//! ```no_run
//! # async fn demo(req: hyper::Request<()>) -> Result<(), serve_files::error::ServeError> {
//! use serve_files::config::HandlerConfig;
//! use serve_files::handler::{DirectStages, FileServer};
//!
//! let config = HandlerConfig::builder("/srv/www").build()?;
//! let server = FileServer::new(config, DirectStages);
//! let response = server.handle(&req, None).await;
//! # drop(response);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod handler;
pub mod http;
pub mod logger;
pub mod pool;
pub mod pump;
