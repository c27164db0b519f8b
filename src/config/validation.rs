//! Configuration validation

use super::*;
use crate::error::{CoreError, Result};

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_rate_limits(&config.rate_limits)?;
    validate_monitor_config(&config.monitor)?;
    validate_validator_config(&config.validator)?;
    validate_csrf_config(&config.csrf)?;
    validate_logging_config(&config.logging)?;
    validate_server_config(&config.server)?;
    Ok(())
}

/// Validate the per-class rate limiters
fn validate_rate_limits(config: &RateLimitSettings) -> Result<()> {
    for (scope, limiter) in [
        ("auth", &config.auth),
        ("api", &config.api),
        ("upload", &config.upload),
        ("general", &config.general),
    ] {
        validate_limiter(scope, limiter)?;
    }

    if config.cleanup_interval_secs == 0 {
        return Err(CoreError::Config(
            "Rate limiter cleanup interval must be greater than 0".to_string()
        ));
    }

    Ok(())
}

fn validate_limiter(scope: &str, limiter: &LimiterSettings) -> Result<()> {
    if limiter.max_requests == 0 {
        return Err(CoreError::Config(
            format!("Rate limiter '{}' max_requests must be greater than 0", scope)
        ));
    }

    if limiter.window_secs == 0 {
        return Err(CoreError::Config(
            format!("Rate limiter '{}' window must be greater than 0", scope)
        ));
    }

    if let Some(identity) = limiter.whitelist.iter().find(|id| limiter.blacklist.contains(id)) {
        return Err(CoreError::Config(
            format!("Rate limiter '{}' lists '{}' on both whitelist and blacklist", scope, identity)
        ));
    }

    Ok(())
}

/// Validate event monitor configuration
fn validate_monitor_config(config: &MonitorConfig) -> Result<()> {
    if config.retention_secs == 0 {
        return Err(CoreError::Config(
            "Monitor retention must be greater than 0".to_string()
        ));
    }

    if config.cleanup_interval_secs == 0 {
        return Err(CoreError::Config(
            "Monitor cleanup interval must be greater than 0".to_string()
        ));
    }

    if config.max_events == 0 || config.max_audit_entries == 0 || config.max_alerts == 0 {
        return Err(CoreError::Config(
            "Monitor log capacities must be greater than 0".to_string()
        ));
    }

    for (event_type, rule) in &config.thresholds {
        if rule.threshold == 0 {
            return Err(CoreError::Config(
                format!("Alert threshold for {} must be greater than 0", event_type)
            ));
        }
        if rule.window_secs == 0 {
            return Err(CoreError::Config(
                format!("Alert window for {} must be greater than 0", event_type)
            ));
        }
    }

    Ok(())
}

/// Validate input validator configuration
fn validate_validator_config(config: &ValidatorConfig) -> Result<()> {
    if config.max_text_length == 0 || config.max_markdown_length == 0 {
        return Err(CoreError::Config(
            "Validator length caps must be greater than 0".to_string()
        ));
    }

    if config.allowed_url_protocols.is_empty() {
        return Err(CoreError::Config(
            "At least one URL protocol must be allowed".to_string()
        ));
    }

    let upload = &config.upload;
    if upload.max_file_size_bytes == 0 {
        return Err(CoreError::Config(
            "Maximum upload size must be greater than 0".to_string()
        ));
    }

    if upload.allowed_mime_types.is_empty() || upload.allowed_extensions.is_empty() {
        return Err(CoreError::Config(
            "Upload allow-lists cannot be empty".to_string()
        ));
    }

    if let Some(ext) = upload
        .allowed_extensions
        .iter()
        .find(|ext| upload.blocked_extensions.contains(ext))
    {
        return Err(CoreError::Config(
            format!("Extension '{}' is both allowed and blocked", ext)
        ));
    }

    Ok(())
}

/// Validate CSRF configuration
fn validate_csrf_config(config: &CsrfConfig) -> Result<()> {
    if config.token_ttl_secs == 0 {
        return Err(CoreError::Config(
            "CSRF token TTL must be greater than 0".to_string()
        ));
    }

    if config.header_name.trim().is_empty() {
        return Err(CoreError::Config(
            "CSRF header name cannot be empty".to_string()
        ));
    }

    let secret_len = config.secret.expose_secret().len();
    if secret_len > 0 && secret_len < 32 {
        return Err(CoreError::Config(
            format!("CSRF secret too short: {} bytes (min: 32)", secret_len)
        ));
    }

    if config.max_sessions == 0 {
        return Err(CoreError::Config(
            "CSRF session capacity must be greater than 0".to_string()
        ));
    }

    Ok(())
}

/// Validate logging configuration
fn validate_logging_config(config: &LoggingConfig) -> Result<()> {
    if !matches!(config.format.as_str(), "json" | "compact" | "pretty") {
        return Err(CoreError::Config(
            format!("Unknown log format '{}' (expected json, compact or pretty)", config.format)
        ));
    }

    Ok(())
}

/// Validate server configuration
pub fn validate_server_config(config: &ServerConfig) -> Result<()> {
    if config.port == 0 {
        return Err(CoreError::Config(
            "Server port cannot be 0".to_string()
        ));
    }

    if config.host.is_empty() {
        return Err(CoreError::Config(
            "Server host cannot be empty".to_string()
        ));
    }

    if config.max_body_size_mb == 0 {
        return Err(CoreError::Config(
            "Maximum body size must be greater than 0".to_string()
        ));
    }

    Ok(())
}
