//! Configuration management for the security core

use serde::{Deserialize, Serialize};
use secrecy::{ExposeSecret, Secret};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::events::SecurityEventType;
use crate::rate_limiter::{RateLimitConfig, RateLimitStrategy};

pub mod loader;
pub mod validation;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rate_limits: RateLimitSettings,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub csrf: CsrfConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Rate limiters, one per request class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Login, registration and password endpoints
    #[serde(default = "default_auth_limiter")]
    pub auth: LimiterSettings,

    /// `/api` endpoints
    #[serde(default = "default_api_limiter")]
    pub api: LimiterSettings,

    /// Upload endpoints
    #[serde(default = "default_upload_limiter")]
    pub upload: LimiterSettings,

    /// Everything else
    #[serde(default = "default_general_limiter")]
    pub general: LimiterSettings,

    /// Interval between stale-entry sweeps
    #[serde(default = "default_limiter_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

/// Settings for a single limiter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSettings {
    pub max_requests: u32,
    pub window_secs: u64,
    #[serde(default)]
    pub strategy: RateLimitStrategy,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// IPs or user ids that are never limited
    #[serde(default)]
    pub whitelist: Vec<String>,
    /// IPs or user ids that are always denied
    #[serde(default)]
    pub blacklist: Vec<String>,
}

impl LimiterSettings {
    /// Build the runtime limiter configuration for `scope`
    pub fn to_rate_limit_config(&self, scope: &str) -> RateLimitConfig {
        RateLimitConfig {
            scope: scope.to_string(),
            max_requests: self.max_requests,
            window_duration: Duration::from_secs(self.window_secs),
            strategy: self.strategy,
            enabled: self.enabled,
            whitelist: self.whitelist.iter().cloned().collect(),
            blacklist: self.blacklist.iter().cloned().collect(),
        }
    }
}

/// Event monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// How long events and audit entries are kept
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// Interval between retention sweeps
    #[serde(default = "default_monitor_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Hard cap on the in-memory event log
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Hard cap on the in-memory audit log
    #[serde(default = "default_max_audit_entries")]
    pub max_audit_entries: usize,

    /// Hard cap on stored alerts; resolved alerts are evicted first
    #[serde(default = "default_max_alerts")]
    pub max_alerts: usize,

    /// Per-type overrides of the built-in alert thresholds
    #[serde(default)]
    pub thresholds: HashMap<SecurityEventType, ThresholdSettings>,
}

impl MonitorConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Alert threshold for one event type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThresholdSettings {
    pub threshold: u32,
    pub window_secs: u64,
}

/// Input validator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Inputs longer than this produce a warning
    #[serde(default = "default_large_input_warning")]
    pub large_input_warning: usize,

    /// Length cap of the generic `text` schema
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,

    /// Length cap of the `markdown` schema
    #[serde(default = "default_max_markdown_length")]
    pub max_markdown_length: usize,

    /// Protocols accepted by the `url` schema
    #[serde(default = "default_url_protocols")]
    pub allowed_url_protocols: Vec<String>,

    #[serde(default)]
    pub upload: UploadConfig,
}

/// File upload policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,

    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,

    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    #[serde(default = "default_blocked_extensions")]
    pub blocked_extensions: Vec<String>,
}

/// Cross-site request forgery protection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrfConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HMAC signing secret; a random one is generated when empty
    #[serde(
        default = "default_csrf_secret",
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub secret: Secret<String>,

    #[serde(default = "default_csrf_ttl")]
    pub token_ttl_secs: u64,

    /// Request header carrying the token
    #[serde(default = "default_csrf_header")]
    pub header_name: String,

    /// Paths exempt from the token check
    #[serde(default = "default_csrf_skip_paths")]
    pub skip_paths: Vec<String>,

    /// Maximum number of sessions holding a live token
    #[serde(default = "default_csrf_max_sessions")]
    pub max_sessions: u64,
}

impl CsrfConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json, compact or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_port")]
    pub port: u16,

    #[serde(default = "default_server_host")]
    pub host: String,

    /// Maximum request body size in MB
    #[serde(default = "default_max_body_size")]
    pub max_body_size_mb: usize,
}

// Default value functions
fn default_true() -> bool { true }

fn default_auth_limiter() -> LimiterSettings {
    LimiterSettings {
        max_requests: 5,
        window_secs: 15 * 60,
        strategy: RateLimitStrategy::FixedWindow,
        enabled: true,
        whitelist: Vec::new(),
        blacklist: Vec::new(),
    }
}

fn default_api_limiter() -> LimiterSettings {
    LimiterSettings {
        max_requests: 100,
        window_secs: 60,
        strategy: RateLimitStrategy::SlidingWindow,
        enabled: true,
        whitelist: Vec::new(),
        blacklist: Vec::new(),
    }
}

fn default_upload_limiter() -> LimiterSettings {
    LimiterSettings {
        max_requests: 10,
        window_secs: 60 * 60,
        strategy: RateLimitStrategy::TokenBucket,
        enabled: true,
        whitelist: Vec::new(),
        blacklist: Vec::new(),
    }
}

fn default_general_limiter() -> LimiterSettings {
    LimiterSettings {
        max_requests: 300,
        window_secs: 60,
        strategy: RateLimitStrategy::LeakyBucket,
        enabled: true,
        whitelist: Vec::new(),
        blacklist: Vec::new(),
    }
}

fn default_limiter_cleanup_interval() -> u64 { 60 }
fn default_retention() -> u64 { 24 * 60 * 60 }
fn default_monitor_cleanup_interval() -> u64 { 60 * 60 }
fn default_max_events() -> usize { 10_000 }
fn default_max_audit_entries() -> usize { 10_000 }
fn default_max_alerts() -> usize { 1_000 }
fn default_large_input_warning() -> usize { 10_000 }
fn default_max_text_length() -> usize { 10_000 }
fn default_max_markdown_length() -> usize { 1_000_000 }
fn default_url_protocols() -> Vec<String> {
    vec!["http".to_string(), "https".to_string(), "mailto".to_string()]
}
fn default_max_file_size() -> u64 { 10 * 1024 * 1024 }
fn default_allowed_mime_types() -> Vec<String> {
    [
        "text/markdown",
        "text/x-markdown",
        "text/plain",
        "application/json",
        "image/png",
        "image/jpeg",
        "image/gif",
        "image/webp",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_allowed_extensions() -> Vec<String> {
    ["md", "markdown", "txt", "json", "png", "jpg", "jpeg", "gif", "webp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_blocked_extensions() -> Vec<String> {
    [
        "exe", "bat", "cmd", "com", "sh", "ps1", "vbs", "js", "jar", "msi", "dll", "scr",
        "php", "py", "pl", "cgi", "html", "htm", "svg",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_csrf_secret() -> Secret<String> { Secret::new(String::new()) }
fn default_csrf_ttl() -> u64 { 60 * 60 }
fn default_csrf_header() -> String { "x-csrf-token".to_string() }
fn default_csrf_skip_paths() -> Vec<String> {
    vec![
        "/auth/login".to_string(),
        "/auth/register".to_string(),
        "/csrf/token".to_string(),
    ]
}
fn default_csrf_max_sessions() -> u64 { 100_000 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }
fn default_server_port() -> u16 { 8080 }
fn default_server_host() -> String { "0.0.0.0".to_string() }
fn default_max_body_size() -> usize { 10 }

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            auth: default_auth_limiter(),
            api: default_api_limiter(),
            upload: default_upload_limiter(),
            general: default_general_limiter(),
            cleanup_interval_secs: default_limiter_cleanup_interval(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention(),
            cleanup_interval_secs: default_monitor_cleanup_interval(),
            max_events: default_max_events(),
            max_audit_entries: default_max_audit_entries(),
            max_alerts: default_max_alerts(),
            thresholds: HashMap::new(),
        }
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            large_input_warning: default_large_input_warning(),
            max_text_length: default_max_text_length(),
            max_markdown_length: default_max_markdown_length(),
            allowed_url_protocols: default_url_protocols(),
            upload: UploadConfig::default(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size(),
            allowed_mime_types: default_allowed_mime_types(),
            allowed_extensions: default_allowed_extensions(),
            blocked_extensions: default_blocked_extensions(),
        }
    }
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            secret: default_csrf_secret(),
            token_ttl_secs: default_csrf_ttl(),
            header_name: default_csrf_header(),
            skip_paths: default_csrf_skip_paths(),
            max_sessions: default_csrf_max_sessions(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            host: default_server_host(),
            max_body_size_mb: default_max_body_size(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let config = loader::load_config(path)?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let config = loader::load_config_with_env(path)?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Validate this configuration
    pub fn validate(&self) -> crate::error::Result<()> {
        validation::validate_config(self)
    }

    /// Create default configuration
    pub fn default_config() -> Self {
        Self {
            rate_limits: RateLimitSettings::default(),
            monitor: MonitorConfig::default(),
            validator: ValidatorConfig::default(),
            csrf: CsrfConfig::default(),
            logging: LoggingConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Custom serializer for Secret<String>
fn serialize_secret<S>(secret: &Secret<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}

/// Custom deserializer for Secret<String>
fn deserialize_secret<'de, D>(deserializer: D) -> Result<Secret<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(Secret::new(s))
}
