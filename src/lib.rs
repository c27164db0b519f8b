//! Security Core - request protection for web services
//!
//! This library puts a layered security pipeline in front of request
//! handlers: multi-strategy rate limiting, CSRF verification, input
//! validation with attack-pattern scanning, and a security event monitor that
//! raises threshold alerts and keeps an audit trail.
//!
//! ## Features
//!
//! - **Rate Limiting**: fixed window, sliding window, token bucket and leaky bucket
//! - **CSRF Protection**: HMAC-signed per-session tokens
//! - **Input Validation**: named schemas, injection scanning, HTML sanitizing, upload checks
//! - **Monitoring**: per-type alert thresholds, audit log, retention sweeps
//! - **Observability**: structured logging and Prometheus metrics
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use security_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let context = SecurityContext::from_config(Config::default());
//!
//!     let request = SecurityRequest::new("GET", "/api/items", "203.0.113.9");
//!     let decision = context
//!         .middleware
//!         .process_request(&request, RequestContext::new())
//!         .await;
//!
//!     if let Some(error) = decision.error {
//!         println!("denied with {}: {}", error.status_code(), error);
//!     }
//!     Ok(())
//! }
//! ```

pub mod background;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod middleware;
pub mod monitor;
pub mod observability;
pub mod rate_limiter;
pub mod server;
pub mod shutdown;
pub mod validation;

pub use config::Config;
pub use error::{CoreError, Result, SecurityError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::context::SecurityContext;
    pub use crate::error::{CoreError, Result, SecurityError};
    pub use crate::events::{
        AuditLogEntry, AuditOutcome, RiskLevel, SecurityAlert, SecurityEvent, SecurityEventType,
        SecurityRequest,
    };
    pub use crate::middleware::{
        CsrfProtection, RequestContext, SecurityDecision, SecurityMiddleware,
    };
    pub use crate::monitor::{AuditFilter, EventFilter, SecurityMonitor};
    pub use crate::observability::SecurityMetrics;
    pub use crate::rate_limiter::{RateLimitConfig, RateLimitStrategy, RateLimiter};
    pub use crate::validation::{FieldSchema, InputValidator, ValidationContext, ValidationResult};
}
