// Configuration types module
// Defines the file/env configuration data structures

use serde::Deserialize;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub performance: PerformanceConfig,
    pub files: FilesConfig,
}

/// Server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Worker threads; unset runs everything on a single thread
    #[serde(default)]
    pub workers: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Minimum level: error, warn, info or debug
    pub level: String,
    pub access_log: bool,
    /// Access log format (combined, common or json)
    #[serde(default = "default_access_log_format")]
    pub access_log_format: String,
    /// Access log file path (optional, stdout if not set)
    #[serde(default)]
    pub access_log_file: Option<String>,
    /// Error log file path (optional, stderr if not set)
    #[serde(default)]
    pub error_log_file: Option<String>,
}

#[allow(clippy::missing_const_for_fn)]
fn default_access_log_format() -> String {
    "combined".to_string()
}

/// Performance configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PerformanceConfig {
    pub keep_alive: bool,
    /// Seconds allowed for reading a request head
    pub request_timeout: u64,
}

/// File serving configuration
#[derive(Debug, Deserialize, Clone)]
pub struct FilesConfig {
    pub document_root: String,
    pub follow_symbolic_links: bool,
    /// Zero or less disables HTTP caching headers
    pub cache_time_seconds: i64,
    #[serde(default)]
    pub descriptor_cache: DescriptorCacheConfig,
}

/// Descriptor cache configuration
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct DescriptorCacheConfig {
    pub enabled: bool,
    /// Maximum number of cached paths
    pub capacity: usize,
    /// Ceiling on how long a failed open/stat stays cached
    pub error_ttl_seconds: u64,
    /// Interval between sweeps of idle expired entries
    pub sweep_interval_seconds: u64,
}

impl Default for DescriptorCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 1024,
            error_ttl_seconds: 10,
            sweep_interval_seconds: 30,
        }
    }
}
