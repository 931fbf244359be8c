use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use tracing_subscriber::EnvFilter;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_POLL_BUDGET_SECS: u64 = 60;
const DEFAULT_DARAJA_BASE_URL: &str = "https://sandbox.safaricom.co.ke";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// M-Pesa (Daraja) gateway configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct MpesaConfig {
    /// Daraja API base URL (sandbox by default)
    #[serde(default = "default_daraja_base_url")]
    pub base_url: String,

    /// OAuth consumer key
    pub consumer_key: String,

    /// OAuth consumer secret
    pub consumer_secret: String,

    /// STK push passkey
    pub passkey: String,

    /// Business short code (PartyB / BusinessShortCode)
    pub short_code: u64,

    /// Public URL Daraja posts the async payment result to
    pub callback_url: String,

    /// Outbound HTTP timeout in seconds
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

/// Application configuration, loaded from config files plus `APP__*`
/// environment overrides.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret used to verify bearer tokens from the identity provider
    pub jwt_secret: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to create missing tables on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Seconds between STK status polls after a push is initiated
    #[serde(default = "default_poll_interval_secs")]
    pub payment_poll_interval_secs: u64,

    /// Total wall-clock budget for the poll loop before giving up
    #[serde(default = "default_poll_budget_secs")]
    pub payment_poll_budget_secs: u64,

    /// Flat tax applied on receipts, in minor currency units (policy constant)
    #[serde(default)]
    pub receipt_tax_minor: i64,

    /// Optional push-notification dispatch URL; notifications are disabled
    /// when unset
    #[serde(default)]
    pub notify_url: Option<String>,

    /// M-Pesa gateway settings
    pub mpesa: MpesaConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_poll_budget_secs() -> u64 {
    DEFAULT_POLL_BUDGET_SECS
}
fn default_daraja_base_url() -> String {
    DEFAULT_DARAJA_BASE_URL.to_string()
}
fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

impl AppConfig {
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
            || self.environment.eq_ignore_ascii_case("dev")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Loads configuration from `config/default.toml`, an optional
/// environment-specific file, and `APP__*` environment variables (highest
/// precedence). Nested keys use `__` as separator, e.g.
/// `APP__MPESA__CONSUMER_KEY`.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let config = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    config.try_deserialize()
}

/// Initializes the global tracing subscriber. `RUST_LOG` wins over the
/// configured level when set.
pub fn init_tracing(log_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
