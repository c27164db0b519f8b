//! Data models for security events, alerts, and audit records

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Ordered free-form details attached to events and audit records
pub type Details = IndexMap<String, Value>;

/// Kinds of security events the core can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    AuthenticationFailure,
    AuthenticationSuccess,
    AuthorizationFailure,
    RateLimitExceeded,
    XssAttempt,
    SqlInjectionAttempt,
    PathTraversalAttempt,
    CommandInjectionAttempt,
    CsrfTokenMismatch,
    BruteForceAttempt,
    SuspiciousActivity,
    MaliciousInput,
    ValidationFailure,
    FileUploadBlocked,
    SessionHijackAttempt,
    InvalidToken,
    TokenExpired,
    PrivilegeEscalation,
    BlacklistedAccess,
    SecurityError,
}

impl SecurityEventType {
    /// Every event type, in declaration order
    pub const ALL: [SecurityEventType; 20] = [
        Self::AuthenticationFailure,
        Self::AuthenticationSuccess,
        Self::AuthorizationFailure,
        Self::RateLimitExceeded,
        Self::XssAttempt,
        Self::SqlInjectionAttempt,
        Self::PathTraversalAttempt,
        Self::CommandInjectionAttempt,
        Self::CsrfTokenMismatch,
        Self::BruteForceAttempt,
        Self::SuspiciousActivity,
        Self::MaliciousInput,
        Self::ValidationFailure,
        Self::FileUploadBlocked,
        Self::SessionHijackAttempt,
        Self::InvalidToken,
        Self::TokenExpired,
        Self::PrivilegeEscalation,
        Self::BlacklistedAccess,
        Self::SecurityError,
    ];

    /// Wire name, identical to the serde representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthenticationFailure => "authentication_failure",
            Self::AuthenticationSuccess => "authentication_success",
            Self::AuthorizationFailure => "authorization_failure",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::XssAttempt => "xss_attempt",
            Self::SqlInjectionAttempt => "sql_injection_attempt",
            Self::PathTraversalAttempt => "path_traversal_attempt",
            Self::CommandInjectionAttempt => "command_injection_attempt",
            Self::CsrfTokenMismatch => "csrf_token_mismatch",
            Self::BruteForceAttempt => "brute_force_attempt",
            Self::SuspiciousActivity => "suspicious_activity",
            Self::MaliciousInput => "malicious_input",
            Self::ValidationFailure => "validation_failure",
            Self::FileUploadBlocked => "file_upload_blocked",
            Self::SessionHijackAttempt => "session_hijack_attempt",
            Self::InvalidToken => "invalid_token",
            Self::TokenExpired => "token_expired",
            Self::PrivilegeEscalation => "privilege_escalation",
            Self::BlacklistedAccess => "blacklisted_access",
            Self::SecurityError => "security_error",
        }
    }

    /// Parse a wire name back into an event type
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordinal severity attached to events and alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded security event.
///
/// Events are assembled with the `with_*` builders and are not mutated once
/// handed to the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub event_type: SecurityEventType,
    pub risk_level: RiskLevel,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub details: Details,
}

impl SecurityEvent {
    /// Create a new event stamped with the current time
    pub fn new(event_type: SecurityEventType, risk_level: RiskLevel) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            risk_level,
            timestamp: Utc::now(),
            user_id: None,
            session_id: None,
            ip: None,
            user_agent: None,
            details: Details::new(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Copy ip, user agent, user id and timestamp from a request
    pub fn with_request(mut self, request: &SecurityRequest) -> Self {
        self.ip = Some(request.ip.clone());
        self.user_agent = request.user_agent.clone();
        if self.user_id.is_none() {
            self.user_id = request.user_id.clone();
        }
        self.timestamp = request.timestamp;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Identity used for rolling counts: user id, then ip, then `anonymous`
    pub fn identity(&self) -> &str {
        self.user_id
            .as_deref()
            .or(self.ip.as_deref())
            .unwrap_or("anonymous")
    }

    /// Look up a string detail
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(Value::as_str)
    }
}

/// Alert synthesized from one or more events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub id: Uuid,
    pub event_type: SecurityEventType,
    pub severity: RiskLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Events counted in the window that triggered this alert
    pub event_ids: Vec<Uuid>,
    pub affected_resources: Vec<String>,
    pub recommended_actions: Vec<String>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Outcome of an audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
    Blocked,
}

/// Audit record of an action outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub resource: String,
    pub outcome: AuditOutcome,
    pub user_id: Option<String>,
    pub ip: Option<String>,
    #[serde(default)]
    pub details: Details,
}

impl AuditLogEntry {
    pub fn new(action: impl Into<String>, resource: impl Into<String>, outcome: AuditOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action: action.into(),
            resource: resource.into(),
            outcome,
            user_id: None,
            ip: None,
            details: Details::new(),
        }
    }

    /// Attribute the entry to the request's user and ip, at the request's time
    pub fn with_request(mut self, request: &SecurityRequest) -> Self {
        self.user_id = request.user_id.clone();
        self.ip = Some(request.ip.clone());
        self.timestamp = request.timestamp;
        self
    }

    pub fn with_details(mut self, details: Details) -> Self {
        self.details = details;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Descriptor of one inbound action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityRequest {
    /// Upper-cased HTTP-style method
    pub method: String,
    pub path: String,
    /// Header map with lower-cased names
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    pub ip: String,
    pub user_agent: Option<String>,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SecurityRequest {
    pub fn new(method: impl AsRef<str>, path: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            method: method.as_ref().to_ascii_uppercase(),
            path: path.into(),
            headers: IndexMap::new(),
            ip: ip.into(),
            user_agent: None,
            user_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        let name = name.as_ref().to_ascii_lowercase();
        let value = value.into();
        if name == "user-agent" {
            self.user_agent = Some(value.clone());
        }
        self.headers.insert(name, value);
        self
    }

    /// Attach the authenticated user after the fact
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Whether the method changes server state
    pub fn is_state_changing(&self) -> bool {
        matches!(self.method.as_str(), "POST" | "PUT" | "PATCH" | "DELETE")
    }

    /// Epoch milliseconds of the request timestamp
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}
