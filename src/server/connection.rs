// Connection handling module
// Serves one accepted TCP connection with the file server

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioIo, TokioTimer};
use serve_files::config::Config;
use serve_files::handler::{FileServer, Stages};
use serve_files::http::Completion;
use serve_files::logger::{self, AccessLogEntry};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// Per-connection settings, read once from the configuration
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub keep_alive: bool,
    pub header_read_timeout: Duration,
    /// Access log format, `None` when access logging is off
    pub access_log: Option<Arc<str>>,
}

impl ConnectionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            keep_alive: config.performance.keep_alive,
            header_read_timeout: Duration::from_secs(config.performance.request_timeout.max(1)),
            access_log: config
                .logging
                .access_log
                .then(|| Arc::from(config.logging.access_log_format.as_str())),
        }
    }
}

/// Handle a single connection in a spawned task.
///
/// This function:
/// 1. Wraps the TCP stream in `TokioIo`
/// 2. Configures HTTP/1.1 connection settings (keep-alive, header timeout)
/// 3. Serves every request on the connection with `server`
/// 4. Writes one access log line per fully delivered response
pub fn handle_connection<S: Stages>(
    stream: TcpStream,
    peer_addr: SocketAddr,
    server: Arc<FileServer<S>>,
    settings: Arc<ConnectionSettings>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        logger::log_debug(&format!("Failed to set TCP_NODELAY for {peer_addr}: {e}"));
    }

    tokio::spawn(async move {
        let io = TokioIo::new(stream);

        let mut builder = http1::Builder::new();
        builder
            .keep_alive(settings.keep_alive)
            .timer(TokioTimer::new())
            .header_read_timeout(settings.header_read_timeout);

        let conn = builder.serve_connection(
            io,
            service_fn(move |req: Request<Incoming>| {
                let server = Arc::clone(&server);
                let completion = settings
                    .access_log
                    .as_ref()
                    .map(|format| access_log_completion(peer_addr, &req, Arc::clone(format)));
                async move { Ok::<_, Infallible>(server.handle(&req, completion).await) }
            }),
        );

        if let Err(err) = conn.await {
            logger::log_connection_error(&err);
        }
    });
}

/// Completion that writes the access log line once the body is delivered
fn access_log_completion<B>(
    peer_addr: SocketAddr,
    req: &Request<B>,
    format: Arc<str>,
) -> Completion {
    let mut entry = AccessLogEntry::from_request(peer_addr, req);
    let started = Instant::now();
    Box::new(move |status, bytes| {
        entry.finish(status, bytes, started.elapsed());
        logger::log_access(&entry, &format);
    })
}
