//! Built-in alert thresholds and per-type alert text

use std::collections::HashMap;

use crate::config::ThresholdSettings;
use crate::events::{SecurityEvent, SecurityEventType};

const MINUTE: u64 = 60;

/// Default threshold and window for an event type
pub fn default_threshold(event_type: SecurityEventType) -> ThresholdSettings {
    use SecurityEventType::*;

    let (threshold, window_secs) = match event_type {
        AuthenticationFailure => (5, 15 * MINUTE),
        BruteForceAttempt => (3, 15 * MINUTE),
        RateLimitExceeded => (10, 5 * MINUTE),
        XssAttempt | SqlInjectionAttempt | PathTraversalAttempt | CommandInjectionAttempt => {
            (1, MINUTE)
        }
        CsrfTokenMismatch => (3, 10 * MINUTE),
        MaliciousInput => (3, 10 * MINUTE),
        SuspiciousActivity => (5, 10 * MINUTE),
        FileUploadBlocked => (5, 10 * MINUTE),
        SessionHijackAttempt | PrivilegeEscalation => (1, 60 * MINUTE),
        BlacklistedAccess => (5, 10 * MINUTE),
        InvalidToken => (5, 15 * MINUTE),
        _ => (10, 10 * MINUTE),
    };

    ThresholdSettings { threshold, window_secs }
}

/// Resolved thresholds: built-in defaults overlaid with configured overrides
#[derive(Debug, Clone)]
pub struct ThresholdTable {
    rules: HashMap<SecurityEventType, ThresholdSettings>,
}

impl ThresholdTable {
    pub fn new(overrides: &HashMap<SecurityEventType, ThresholdSettings>) -> Self {
        let rules = SecurityEventType::ALL
            .iter()
            .map(|event_type| {
                let rule = overrides
                    .get(event_type)
                    .copied()
                    .unwrap_or_else(|| default_threshold(*event_type));
                (*event_type, rule)
            })
            .collect();

        Self { rules }
    }

    pub fn get(&self, event_type: SecurityEventType) -> ThresholdSettings {
        self.rules
            .get(&event_type)
            .copied()
            .unwrap_or_else(|| default_threshold(event_type))
    }

    /// Event type whose budget `event` is counted against.
    ///
    /// Denials from the `auth` limiter share the authentication-failure budget.
    pub fn budget_for(&self, event: &SecurityEvent) -> SecurityEventType {
        match event.event_type {
            SecurityEventType::RateLimitExceeded if event.detail_str("scope") == Some("auth") => {
                SecurityEventType::AuthenticationFailure
            }
            other => other,
        }
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self::new(&HashMap::new())
    }
}

/// Alert message and recommended actions for an event type
pub fn alert_text(event_type: SecurityEventType) -> (&'static str, &'static [&'static str]) {
    use SecurityEventType::*;

    match event_type {
        AuthenticationFailure => (
            "Multiple failed authentication attempts detected",
            &[
                "Review authentication logs for the affected identity",
                "Consider temporarily locking the account",
                "Require additional verification on next login",
            ],
        ),
        AuthenticationSuccess => (
            "Unusual volume of successful authentications",
            &["Verify the sessions belong to the account owner"],
        ),
        AuthorizationFailure => (
            "Repeated access to forbidden resources",
            &["Review the identity's permissions", "Check for enumeration attempts"],
        ),
        RateLimitExceeded => (
            "Rate limit repeatedly exceeded",
            &[
                "Inspect the traffic source for automation",
                "Consider blacklisting the offending address",
            ],
        ),
        XssAttempt => (
            "Cross-site scripting attempt detected",
            &[
                "Review the submitted content",
                "Verify output encoding on affected pages",
                "Block the source if attempts continue",
            ],
        ),
        SqlInjectionAttempt => (
            "SQL injection attempt detected",
            &[
                "Review the submitted input",
                "Verify queries on the affected path are parameterized",
                "Block the source if attempts continue",
            ],
        ),
        PathTraversalAttempt => (
            "Path traversal attempt detected",
            &["Review file access on the affected path", "Block the source"],
        ),
        CommandInjectionAttempt => (
            "Command injection attempt detected",
            &[
                "Review the submitted input",
                "Verify no shell is invoked with user input",
                "Block the source",
            ],
        ),
        CsrfTokenMismatch => (
            "Repeated CSRF token failures",
            &["Check for cross-site request forgery", "Invalidate the session"],
        ),
        BruteForceAttempt => (
            "Brute force attack detected",
            &["Lock the targeted account", "Blacklist the source address"],
        ),
        SuspiciousActivity => (
            "Suspicious activity pattern detected",
            &["Review recent activity for the identity"],
        ),
        MaliciousInput => (
            "Malicious input submitted repeatedly",
            &["Review the submitted content", "Consider blocking the source"],
        ),
        ValidationFailure => (
            "High volume of invalid input",
            &["Check client integrations for malformed requests"],
        ),
        FileUploadBlocked => (
            "Repeated blocked file uploads",
            &["Review the rejected files", "Consider restricting uploads for the identity"],
        ),
        SessionHijackAttempt => (
            "Possible session hijacking detected",
            &["Invalidate all sessions for the account", "Notify the account owner"],
        ),
        InvalidToken => (
            "Repeated use of invalid tokens",
            &["Check for token forgery", "Rotate signing keys if compromise is suspected"],
        ),
        TokenExpired => (
            "High volume of expired tokens",
            &["Check client token refresh behaviour"],
        ),
        PrivilegeEscalation => (
            "Privilege escalation attempt detected",
            &[
                "Suspend the account pending review",
                "Audit recent permission changes",
            ],
        ),
        BlacklistedAccess => (
            "Blacklisted identity keeps retrying",
            &["Confirm the blacklist entry", "Block at the network edge"],
        ),
        SecurityError => (
            "Security checks are failing",
            &["Inspect the service logs for internal errors"],
        ),
    }
}
