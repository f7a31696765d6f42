//! HTTP protocol layer module
//!
//! HTTP semantics for file responses, decoupled from filesystem access:
//! date handling, content types, conditional and range evaluation, header
//! composition and the response body type.

pub mod body;
pub mod cache;
pub mod conditional;
pub mod date;
pub mod mime;
pub mod range;
pub mod response;

// Re-export commonly used types
pub use body::{BodySink, ChannelSink, Completion, FileBody, SinkClosed};
pub use cache::CachePolicy;
pub use conditional::EarlyResult;
pub use range::{RangeOutcome, RangeWindow};
pub use response::{build_error_response, compose_headers, Disposition};
