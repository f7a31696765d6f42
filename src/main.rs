use serve_files::cache::{CacheSettings, CachedStages, DescriptorCache};
use serve_files::config::{Config, HandlerConfig};
use serve_files::handler::{DirectStages, FileServer};
use serve_files::logger;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

mod server;

use server::ConnectionSettings;

/// Config file looked up when no path is given (extension optional)
const DEFAULT_CONFIG: &str = "config";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let cfg = Config::load_from(&config_path)?;
    logger::init(&cfg)?;

    // Single-threaded unless workers are configured explicitly
    let runtime = match cfg.server.workers {
        Some(workers) => tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers.max(1))
            .enable_all()
            .build()?,
        None => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?,
    };

    runtime.block_on(async_main(cfg))
}

async fn async_main(cfg: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = cfg.get_socket_addr()?;
    let handler_config = HandlerConfig::from_files(&cfg.files)?;
    let listener = server::create_reusable_listener(addr)?;
    let settings = Arc::new(ConnectionSettings::from_config(&cfg));

    logger::log_server_start(&addr, &cfg);

    let cache_config = &cfg.files.descriptor_cache;
    if cache_config.enabled {
        let cache = DescriptorCache::new(CacheSettings::from_config(cache_config));
        spawn_sweeper(
            Arc::clone(&cache),
            Duration::from_secs(cache_config.sweep_interval_seconds.max(1)),
        );
        let file_server = FileServer::new(handler_config, CachedStages::new(cache));
        server::run(listener, Arc::new(file_server), settings).await;
    } else {
        let file_server = FileServer::new(handler_config, DirectStages);
        server::run(listener, Arc::new(file_server), settings).await;
    }

    logger::log_info("Server stopped");
    Ok(())
}

/// Periodically drop idle, expired cache entries
fn spawn_sweeper(cache: Arc<DescriptorCache>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let removed = cache.sweep();
            if removed > 0 {
                logger::log_debug(&format!(
                    "Descriptor cache sweep removed {removed} entries, {} remain",
                    cache.len()
                ));
            }
        }
    });
}
