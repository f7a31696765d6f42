// Configuration module entry point
// Loads file/env configuration and builds the immutable per-handler settings

mod handler;
mod types;

use std::net::SocketAddr;

// Re-export public types
pub use handler::{HandlerConfig, HandlerConfigBuilder};
pub use types::{
    Config, DescriptorCacheConfig, FilesConfig, LoggingConfig, PerformanceConfig, ServerConfig,
};

impl Config {
    /// Load configuration from specified file path (extension optional)
    /// Default config file is "config.toml" when no path specified
    pub fn load_from(config_path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("SERVE_FILES")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("logging.level", "info")?
            .set_default("logging.access_log", true)?
            .set_default("logging.access_log_format", "combined")?
            .set_default("performance.keep_alive", true)?
            .set_default("performance.request_timeout", 30)?
            .set_default("files.document_root", ".")?
            .set_default("files.follow_symbolic_links", false)?
            .set_default("files.cache_time_seconds", 0)?
            .set_default("files.descriptor_cache.enabled", true)?
            .set_default("files.descriptor_cache.capacity", 1024)?
            .set_default("files.descriptor_cache.error_ttl_seconds", 10)?
            .set_default("files.descriptor_cache.sweep_interval_seconds", 30)?
            .build()?;

        settings.try_deserialize()
    }

    pub fn get_socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| format!("Invalid address: {e}"))
    }
}
