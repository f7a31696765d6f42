// Server module entry
// Accept loop, per-connection serving and shutdown signals

pub mod connection;
pub mod listener;
pub mod signal;

pub use connection::{handle_connection, ConnectionSettings};
pub use listener::create_reusable_listener;

use serve_files::handler::{FileServer, Stages};
use serve_files::logger;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Accept connections until a shutdown signal arrives
///
/// In-flight connections keep running on their own tasks; the runtime
/// drops them when `main` returns.
pub async fn run<S: Stages>(
    listener: TcpListener,
    server: Arc<FileServer<S>>,
    settings: Arc<ConnectionSettings>,
) {
    let shutdown = signal::shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accept_result = listener.accept() => match accept_result {
                Ok((stream, peer_addr)) => handle_connection(
                    stream,
                    peer_addr,
                    Arc::clone(&server),
                    Arc::clone(&settings),
                ),
                Err(e) => logger::log_error(&format!("Failed to accept connection: {e}")),
            },
            () = &mut shutdown => break,
        }
    }
}
