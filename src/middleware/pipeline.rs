//! Request security pipeline
//!
//! Every request passes rate limiting, CSRF verification and body validation
//! in that order. The first failing stage short-circuits; its events go to the
//! monitor, the request is audited as blocked, and a denial decision is
//! returned. Nothing here panics or propagates an error to the caller.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::csrf::CsrfProtection;
use crate::config::RateLimitSettings;
use crate::error::SecurityError;
use crate::events::{
    AuditLogEntry, AuditOutcome, RiskLevel, SecurityAlert, SecurityEvent, SecurityEventType,
    SecurityRequest,
};
use crate::monitor::SecurityMonitor;
use crate::observability::SecurityMetrics;
use crate::rate_limiter::{RateLimitDecision, RateLimiter};
use crate::validation::{InputValidator, ValidationContext, ValidationResult};

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// Request class, selecting the limiter a request is counted against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestClass {
    Auth,
    Api,
    Upload,
    General,
}

impl RequestClass {
    /// Classify a request path
    pub fn classify(path: &str) -> Self {
        let path = path.to_ascii_lowercase();
        const AUTH_MARKERS: [&str; 6] = ["/login", "/logout", "/register", "/signin", "/signup", "/password"];

        if path.starts_with("/auth") || AUTH_MARKERS.iter().any(|m| path.contains(m)) {
            RequestClass::Auth
        } else if path.contains("/upload") {
            RequestClass::Upload
        } else if path.starts_with("/api") {
            RequestClass::Api
        } else {
            RequestClass::General
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestClass::Auth => "auth",
            RequestClass::Api => "api",
            RequestClass::Upload => "upload",
            RequestClass::General => "general",
        }
    }
}

/// One limiter per request class
#[derive(Clone)]
pub struct RequestLimiters {
    pub auth: Arc<RateLimiter>,
    pub api: Arc<RateLimiter>,
    pub upload: Arc<RateLimiter>,
    pub general: Arc<RateLimiter>,
}

impl RequestLimiters {
    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self {
            auth: Arc::new(RateLimiter::new(settings.auth.to_rate_limit_config("auth"))),
            api: Arc::new(RateLimiter::new(settings.api.to_rate_limit_config("api"))),
            upload: Arc::new(RateLimiter::new(settings.upload.to_rate_limit_config("upload"))),
            general: Arc::new(RateLimiter::new(settings.general.to_rate_limit_config("general"))),
        }
    }

    pub fn for_class(&self, class: RequestClass) -> &Arc<RateLimiter> {
        match class {
            RequestClass::Auth => &self.auth,
            RequestClass::Api => &self.api,
            RequestClass::Upload => &self.upload,
            RequestClass::General => &self.general,
        }
    }

    pub fn all(&self) -> [&Arc<RateLimiter>; 4] {
        [&self.auth, &self.api, &self.upload, &self.general]
    }
}

/// Per-request inputs that are not part of the request descriptor
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub session_id: Option<String>,
    /// Parsed request body, if any
    pub body: Option<Value>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Outcome of the pipeline for one request
#[derive(Debug, Clone, Default)]
pub struct SecurityDecision {
    pub allowed: bool,
    pub error: Option<SecurityError>,
    /// Response headers to attach, in insertion order
    pub headers: IndexMap<String, String>,
    pub remaining: Option<u32>,
    pub reset_time: Option<DateTime<Utc>>,
    /// Body with every string sanitized, when the request was allowed
    pub sanitized_body: Option<Value>,
    /// Alerts raised while processing the request
    pub alerts: Vec<SecurityAlert>,
}

impl SecurityDecision {
    /// HTTP status for a denial, 200 when allowed
    pub fn status_code(&self) -> u16 {
        self.error.as_ref().map_or(200, SecurityError::status_code)
    }
}

/// Schema used for a top-level body field
pub fn schema_for_field(field: &str) -> &'static str {
    let field = field.to_ascii_lowercase();
    match field.as_str() {
        "email" => "email",
        "username" => "username",
        "filename" => "filename",
        "url" | "href" => "url",
        "content" | "markdown" | "body" => "markdown",
        f if f.contains("password") => "password",
        f if f.ends_with("_url") => "url",
        _ => "text",
    }
}

/// Orchestrates the security checks for inbound requests
pub struct SecurityMiddleware {
    limiters: RequestLimiters,
    csrf: Arc<CsrfProtection>,
    validator: Arc<InputValidator>,
    monitor: Arc<SecurityMonitor>,
    metrics: Arc<SecurityMetrics>,
}

impl SecurityMiddleware {
    pub fn new(
        limiters: RequestLimiters,
        csrf: Arc<CsrfProtection>,
        validator: Arc<InputValidator>,
        monitor: Arc<SecurityMonitor>,
        metrics: Arc<SecurityMetrics>,
    ) -> Self {
        Self {
            limiters,
            csrf,
            validator,
            monitor,
            metrics,
        }
    }

    /// Run every check for `request`
    pub async fn process_request(
        &self,
        request: &SecurityRequest,
        context: RequestContext,
    ) -> SecurityDecision {
        let started = Instant::now();
        let class = RequestClass::classify(&request.path);
        let mut decision = SecurityDecision::default();

        // 1. Rate limit
        let limit = self.limiters.for_class(class).check_limit(request).await;
        apply_rate_limit_headers(&mut decision, &limit);

        if !limit.allowed {
            let error = rate_limit_error(&limit, request.timestamp);
            if matches!(error, SecurityError::RateLimit { .. }) {
                let retry_after = limit.retry_after_secs(request.timestamp).max(1);
                decision
                    .headers
                    .insert(HEADER_RETRY_AFTER.to_string(), retry_after.to_string());
            }
            let events = limit.event.into_iter().collect();
            return self
                .deny(request, &context, class, decision, error, events, started)
                .await;
        }

        // 2. CSRF
        if self.csrf.enabled()
            && request.is_state_changing()
            && !self.csrf.is_exempt(&request.path)
        {
            let token = request.header(self.csrf.header_name());
            if let Err(err) = self
                .csrf
                .validate(context.session_id.as_deref(), token, request.timestamp)
                .await
            {
                return self
                    .deny(request, &context, class, decision, SecurityError::Csrf(err), Vec::new(), started)
                    .await;
            }
        }

        // 3. Body validation
        if let Some(body) = &context.body {
            let mut validation_context = ValidationContext::from_request(request);
            if let Some(session_id) = &context.session_id {
                validation_context = validation_context.with_session_id(session_id.clone());
            }

            let outcome = self.validate_body(body, &validation_context).await;
            if !outcome.is_valid {
                let error = validation_error(&outcome);
                return self
                    .deny(request, &context, class, decision, error, outcome.events, started)
                    .await;
            }

            // Medium-risk findings that did not fail validation are still recorded
            for event in outcome.events {
                self.record_event(event, &context, &mut decision.alerts).await;
            }
            decision.sanitized_body = outcome.sanitized;
        }

        // 4. Audit
        self.monitor
            .log_audit_entry(
                AuditLogEntry::new("request", request.path.clone(), AuditOutcome::Success)
                    .with_request(request)
                    .with_detail("method", request.method.clone())
                    .with_detail("class", class.as_str()),
            )
            .await;

        debug!(
            method = %request.method,
            path = %request.path,
            class = class.as_str(),
            "Request allowed"
        );

        decision.allowed = true;
        self.metrics.record_decision(None, started.elapsed());
        decision
    }

    /// Validate a request body field by field
    pub async fn validate_body(&self, body: &Value, context: &ValidationContext) -> ValidationResult {
        let Value::Object(fields) = body else {
            return self.validator.validate_named(body, "text", context).await;
        };

        let mut combined = ValidationResult::default();
        let mut sanitized = Map::new();

        for (name, value) in fields {
            let schema = match value {
                Value::String(_) => schema_for_field(name),
                _ => "text",
            };
            let field_result = self
                .validator
                .validate_named(value, schema, &context.for_field(name.clone()))
                .await;

            let field_value = field_result.sanitized.clone();
            combined.absorb(field_result);
            if let Some(field_value) = field_value {
                sanitized.insert(name.clone(), field_value);
            }
        }

        combined.is_valid = combined.errors.is_empty();
        combined.sanitized = combined.is_valid.then(|| Value::Object(sanitized));
        combined
    }

    #[allow(clippy::too_many_arguments)]
    async fn deny(
        &self,
        request: &SecurityRequest,
        context: &RequestContext,
        class: RequestClass,
        mut decision: SecurityDecision,
        error: SecurityError,
        mut events: Vec<SecurityEvent>,
        started: Instant,
    ) -> SecurityDecision {
        if events.is_empty() {
            events.push(event_from_error(request, &error));
        }

        for event in events {
            self.record_event(event, context, &mut decision.alerts).await;
        }

        self.monitor
            .log_audit_entry(
                AuditLogEntry::new("request", request.path.clone(), AuditOutcome::Blocked)
                    .with_request(request)
                    .with_detail("method", request.method.clone())
                    .with_detail("class", class.as_str())
                    .with_detail("reason", error.kind())
                    .with_detail("error", error.to_string()),
            )
            .await;

        warn!(
            method = %request.method,
            path = %request.path,
            ip = %request.ip,
            reason = error.kind(),
            "Request denied: {}",
            error
        );

        self.metrics.record_decision(Some(&error), started.elapsed());
        decision.allowed = false;
        decision.sanitized_body = None;
        decision.error = Some(error);
        decision
    }

    async fn record_event(
        &self,
        mut event: SecurityEvent,
        context: &RequestContext,
        alerts: &mut Vec<SecurityAlert>,
    ) {
        if event.session_id.is_none() {
            event.session_id = context.session_id.clone();
        }

        let alert = self.monitor.log_event(event).await;
        self.metrics.record_event(alert.is_some());
        if let Some(alert) = alert {
            info!(alert_id = %alert.id, "Request raised alert");
            alerts.push(alert);
        }
    }
}

fn apply_rate_limit_headers(decision: &mut SecurityDecision, limit: &RateLimitDecision) {
    decision
        .headers
        .insert(HEADER_LIMIT.to_string(), limit.limit.to_string());
    decision
        .headers
        .insert(HEADER_REMAINING.to_string(), limit.remaining.to_string());
    decision
        .headers
        .insert(HEADER_RESET.to_string(), limit.reset_time.timestamp().to_string());
    decision.remaining = Some(limit.remaining);
    decision.reset_time = Some(limit.reset_time);
}

fn rate_limit_error(limit: &RateLimitDecision, now: DateTime<Utc>) -> SecurityError {
    match &limit.event {
        Some(event) if event.event_type == SecurityEventType::BlacklistedAccess => {
            SecurityError::Blocked {
                message: "identity is blacklisted".to_string(),
                event_type: SecurityEventType::BlacklistedAccess,
                risk_level: event.risk_level,
            }
        }
        _ => SecurityError::RateLimit {
            limit: limit.limit,
            retry_after_secs: limit.retry_after_secs(now),
            reset_time: limit.reset_time,
        },
    }
}

fn validation_error(outcome: &ValidationResult) -> SecurityError {
    let (event_type, risk_level) = outcome
        .primary_event()
        .map(|event| (event.event_type, event.risk_level))
        .unwrap_or((SecurityEventType::ValidationFailure, RiskLevel::Low));

    SecurityError::Validation {
        errors: outcome.errors.clone(),
        event_type,
        risk_level,
    }
}

fn event_from_error(request: &SecurityRequest, error: &SecurityError) -> SecurityEvent {
    let mut event = SecurityEvent::new(error.event_type(), error.risk_level())
        .with_request(request)
        .with_detail("path", request.path.clone())
        .with_detail("method", request.method.clone())
        .with_detail("reason", error.kind())
        .with_detail("error", error.to_string());

    if let SecurityError::Validation { errors, .. } = error {
        event = event.with_detail("errors", errors.clone());
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, CsrfConfig, MonitorConfig, ValidatorConfig};
    use crate::monitor::EventFilter;
    use serde_json::json;

    fn middleware_with(settings: RateLimitSettings) -> (SecurityMiddleware, Arc<SecurityMonitor>, Arc<CsrfProtection>) {
        let monitor = Arc::new(SecurityMonitor::new(MonitorConfig::default()));
        let csrf = Arc::new(CsrfProtection::new(CsrfConfig::default()));
        let middleware = SecurityMiddleware::new(
            RequestLimiters::from_settings(&settings),
            csrf.clone(),
            Arc::new(InputValidator::new(ValidatorConfig::default())),
            monitor.clone(),
            Arc::new(SecurityMetrics::new()),
        );
        (middleware, monitor, csrf)
    }

    fn middleware() -> (SecurityMiddleware, Arc<SecurityMonitor>, Arc<CsrfProtection>) {
        middleware_with(Config::default().rate_limits)
    }

    #[test]
    fn test_request_classification() {
        assert_eq!(RequestClass::classify("/auth/login"), RequestClass::Auth);
        assert_eq!(RequestClass::classify("/api/users/password"), RequestClass::Auth);
        assert_eq!(RequestClass::classify("/api/upload"), RequestClass::Upload);
        assert_eq!(RequestClass::classify("/api/docs"), RequestClass::Api);
        assert_eq!(RequestClass::classify("/"), RequestClass::General);
    }

    #[test]
    fn test_schema_selection() {
        assert_eq!(schema_for_field("email"), "email");
        assert_eq!(schema_for_field("new_password"), "password");
        assert_eq!(schema_for_field("avatar_url"), "url");
        assert_eq!(schema_for_field("content"), "markdown");
        assert_eq!(schema_for_field("title"), "text");
    }

    #[tokio::test]
    async fn test_allowed_request_sets_headers_and_audits() {
        let (middleware, monitor, _) = middleware();
        let request = SecurityRequest::new("GET", "/api/docs", "10.0.0.1");

        let decision = middleware.process_request(&request, RequestContext::new()).await;

        assert!(decision.allowed);
        assert_eq!(decision.status_code(), 200);
        assert_eq!(decision.headers[HEADER_LIMIT], "100");
        assert_eq!(decision.headers[HEADER_REMAINING], "99");
        assert!(!decision.headers.contains_key(HEADER_RETRY_AFTER));

        let audit = monitor.get_audit_logs(&Default::default()).await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].outcome, AuditOutcome::Success);
    }

    #[tokio::test]
    async fn test_missing_csrf_token_denied() {
        let (middleware, monitor, _) = middleware();
        let request = SecurityRequest::new("POST", "/api/docs", "10.0.0.1");

        let decision = middleware
            .process_request(&request, RequestContext::new().with_session_id("s1"))
            .await;

        assert!(!decision.allowed);
        assert_eq!(decision.status_code(), 403);
        assert!(matches!(
            decision.error,
            Some(SecurityError::Csrf(crate::middleware::CsrfError::MissingToken))
        ));

        let events = monitor.get_events(&EventFilter::default()).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, SecurityEventType::CsrfTokenMismatch);
        assert_eq!(events[0].session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_valid_csrf_and_body_sanitized() {
        let (middleware, _, csrf) = middleware();
        let token = csrf.generate_token("s1").await.unwrap();
        let request = SecurityRequest::new("POST", "/api/docs", "10.0.0.1")
            .with_header("X-CSRF-Token", token.token);

        let body = json!({"email": " Bob@Example.com ", "title": "  Notes ", "count": 3});
        let decision = middleware
            .process_request(
                &request,
                RequestContext::new().with_session_id("s1").with_body(body),
            )
            .await;

        assert!(decision.allowed, "{:?}", decision.error);
        assert_eq!(
            decision.sanitized_body,
            Some(json!({"email": "bob@example.com", "title": "Notes", "count": 3}))
        );
    }

    #[tokio::test]
    async fn test_malicious_body_denied_with_scan_event() {
        let (middleware, monitor, _) = middleware();
        // Login is exempt from CSRF, so validation is reached
        let request = SecurityRequest::new("POST", "/auth/login", "10.0.0.9");
        let body = json!({"username": "admin' OR '1'='1", "password": "Secr3t!pass"});

        let decision = middleware
            .process_request(&request, RequestContext::new().with_body(body))
            .await;

        assert!(!decision.allowed);
        assert_eq!(decision.status_code(), 400);
        match &decision.error {
            Some(SecurityError::Validation { event_type, risk_level, .. }) => {
                assert_eq!(*event_type, SecurityEventType::SqlInjectionAttempt);
                assert_eq!(*risk_level, RiskLevel::High);
            }
            other => panic!("unexpected decision error: {:?}", other),
        }

        // SQL injection alerts on the first occurrence
        assert_eq!(decision.alerts.len(), 1);
        let blocked = monitor
            .get_audit_logs(&crate::monitor::AuditFilter {
                outcome: Some(AuditOutcome::Blocked),
                ..Default::default()
            })
            .await;
        assert_eq!(blocked.len(), 1);
    }

    #[tokio::test]
    async fn test_schema_failure_synthesizes_low_risk_event() {
        let (middleware, monitor, _) = middleware();
        let request = SecurityRequest::new("POST", "/auth/register", "10.0.0.3");
        let body = json!({"email": "not-an-email"});

        let decision = middleware
            .process_request(&request, RequestContext::new().with_body(body))
            .await;

        assert!(matches!(
            decision.error,
            Some(SecurityError::Validation { event_type: SecurityEventType::ValidationFailure, risk_level: RiskLevel::Low, .. })
        ));
        let events = monitor.get_events(&EventFilter::default()).await;
        assert_eq!(events[0].event_type, SecurityEventType::ValidationFailure);
    }

    #[tokio::test]
    async fn test_rate_limit_short_circuits_before_csrf() {
        let mut settings = Config::default().rate_limits;
        settings.api.max_requests = 1;
        let (middleware, _, _) = middleware_with(settings);
        let request = SecurityRequest::new("GET", "/api/docs", "10.0.0.1");

        assert!(middleware.process_request(&request, RequestContext::new()).await.allowed);

        // No session or token: rate limit must answer first
        let post = SecurityRequest::new("POST", "/api/docs", "10.0.0.1").at(request.timestamp);
        let decision = middleware.process_request(&post, RequestContext::new()).await;
        assert!(!decision.allowed);
        assert_eq!(decision.status_code(), 429);
        assert!(decision.headers.contains_key(HEADER_RETRY_AFTER));
        assert_eq!(decision.headers[HEADER_REMAINING], "0");
    }

    #[tokio::test]
    async fn test_blacklisted_identity_blocked() {
        let mut settings = Config::default().rate_limits;
        settings.general.blacklist = vec!["10.6.6.6".to_string()];
        let (middleware, _, _) = middleware_with(settings);

        let request = SecurityRequest::new("GET", "/", "10.6.6.6");
        let decision = middleware.process_request(&request, RequestContext::new()).await;

        assert_eq!(decision.status_code(), 403);
        assert!(matches!(decision.error, Some(SecurityError::Blocked { .. })));
        assert!(!decision.headers.contains_key(HEADER_RETRY_AFTER));
    }
}
