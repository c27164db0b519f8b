//! Error types for the security core

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::events::{RiskLevel, SecurityEventType};
use crate::middleware::CsrfError;
use crate::monitor::MonitorError;

/// Result type alias for security core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Main error type for the security core
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Security error: {0}")]
    Security(#[from] SecurityError),

    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("CSRF error: {0}")]
    Csrf(#[from] CsrfError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::Config(err.to_string())
    }
}

/// Typed failure of the request pipeline.
///
/// Every variant maps to the security event type and risk level it is logged
/// with, and to the HTTP-style status a transport layer should answer with.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SecurityError {
    #[error("Rate limit exceeded. Retry after {retry_after_secs}s. Limit: {limit} requests per window")]
    RateLimit {
        limit: u32,
        retry_after_secs: u64,
        reset_time: DateTime<Utc>,
    },

    #[error("CSRF validation failed: {0}")]
    Csrf(CsrfError),

    #[error("Validation failed: {}", errors.join("; "))]
    Validation {
        errors: Vec<String>,
        event_type: SecurityEventType,
        risk_level: RiskLevel,
    },

    #[error("Request blocked: {message}")]
    Blocked {
        message: String,
        event_type: SecurityEventType,
        risk_level: RiskLevel,
    },

    #[error("Security check failed: {0}")]
    Internal(String),
}

impl SecurityError {
    /// Event type this failure is recorded under
    pub fn event_type(&self) -> SecurityEventType {
        match self {
            Self::RateLimit { .. } => SecurityEventType::RateLimitExceeded,
            Self::Csrf(_) => SecurityEventType::CsrfTokenMismatch,
            Self::Validation { event_type, .. } | Self::Blocked { event_type, .. } => *event_type,
            Self::Internal(_) => SecurityEventType::SecurityError,
        }
    }

    /// Risk level this failure is recorded with
    pub fn risk_level(&self) -> RiskLevel {
        match self {
            Self::RateLimit { .. } => RiskLevel::Medium,
            Self::Csrf(err) => err.risk_level(),
            Self::Validation { risk_level, .. } | Self::Blocked { risk_level, .. } => *risk_level,
            Self::Internal(_) => RiskLevel::Medium,
        }
    }

    /// Short machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimit { .. } => "rate_limit",
            Self::Csrf(_) => "csrf",
            Self::Validation { .. } => "validation",
            Self::Blocked { .. } => "blocked",
            Self::Internal(_) => "internal",
        }
    }

    /// HTTP status a transport layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::RateLimit { .. } => 429,
            Self::Csrf(_) => 403,
            Self::Validation { .. } => 400,
            Self::Blocked { .. } => 403,
            Self::Internal(_) => 500,
        }
    }

    /// Whether the caller may retry right away with corrected input
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Serializable summary for transport responses
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo {
            kind: self.kind(),
            message: self.to_string(),
            event_type: self.event_type(),
            risk_level: self.risk_level(),
            status: self.status_code(),
        }
    }
}

/// Caller-facing error summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorInfo {
    pub kind: &'static str,
    pub message: String,
    pub event_type: SecurityEventType,
    pub risk_level: RiskLevel,
    pub status: u16,
}
