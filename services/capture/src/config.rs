use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration for the capture service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Result storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Start the Prometheus exporter
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Where captured frames and videos land on disk
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root of the `{category}/{date}/{session}` tree
    #[serde(default = "default_result_root")]
    pub result_root: PathBuf,
    /// Largest accepted request body (video uploads), in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Reserve a capture session on the first frame when none is active
    #[serde(default)]
    pub auto_start_session: bool,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Serve the storage root under /static/result_images
    #[serde(default = "default_true")]
    pub serve_results: bool,
}

// Default value functions
fn default_service_name() -> String {
    "capture-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_result_root() -> PathBuf {
    PathBuf::from("result_images")
}

fn default_max_upload_bytes() -> usize {
    256 * 1024 * 1024 // 256MB
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8000
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "capture-service")?
            .set_default("service.log_level", "info")?
            // Add config file if present
            .add_source(
                config::File::with_name("config/capture")
                    .required(false)
            )
            .add_source(
                config::File::with_name("/etc/capture/capture")
                    .required(false)
            )
            // Override with environment variables
            // CAPTURE__STORAGE__RESULT_ROOT -> storage.result_root
            .add_source(
                config::Environment::with_prefix("CAPTURE")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Socket address the API binds to
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_enabled: default_true(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            result_root: default_result_root(),
            max_upload_bytes: default_max_upload_bytes(),
            auto_start_session: false,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            serve_results: default_true(),
        }
    }
}
