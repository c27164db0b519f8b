//! Field schemas, formats and the custom validator seam

use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::sync::{Arc, LazyLock};

use super::patterns::PatternCategory;
use crate::config::ValidatorConfig;
use crate::events::{RiskLevel, SecurityEvent, SecurityEventType, SecurityRequest};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$")
        .expect("email regex")
});

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("username regex"));

static FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^/\\\x00-\x1f]+$").expect("filename regex"));

static SCHEME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9+.-]*):").expect("scheme regex"));

/// Who and where a value is being validated for
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    pub field: Option<String>,
    pub path: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub ip: Option<String>,
    pub request: Option<SecurityRequest>,
}

impl ValidationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context attributed to an inbound request
    pub fn from_request(request: &SecurityRequest) -> Self {
        Self {
            field: None,
            path: Some(request.path.clone()),
            user_id: request.user_id.clone(),
            session_id: None,
            ip: Some(request.ip.clone()),
            request: Some(request.clone()),
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Same context, narrowed to one field
    pub fn for_field(&self, field: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            ..self.clone()
        }
    }

    /// Display name of the value under validation
    pub fn field_name(&self) -> &str {
        self.field.as_deref().unwrap_or("input")
    }

    /// Event attributed to this context
    pub fn event(&self, event_type: SecurityEventType, risk_level: RiskLevel) -> SecurityEvent {
        let mut event = SecurityEvent::new(event_type, risk_level);
        if let Some(request) = &self.request {
            event = event.with_request(request);
        }
        if let Some(ip) = &self.ip {
            event = event.with_ip(ip.clone());
        }
        if let Some(user_id) = &self.user_id {
            event = event.with_user_id(user_id.clone());
        }
        if let Some(session_id) = &self.session_id {
            event = event.with_session_id(session_id.clone());
        }
        if let Some(path) = &self.path {
            event = event.with_detail("path", path.clone());
        }
        if let Some(field) = &self.field {
            event = event.with_detail("field", field.clone());
        }
        event
    }
}

/// Custom check applied after the built-in schema rules
#[async_trait]
pub trait Validator: Send + Sync {
    /// Returns an error message when `value` is rejected
    async fn validate(&self, value: &str, context: &ValidationContext) -> Result<(), String>;
}

/// Rejects values equal (case-insensitively) to a reserved word
#[derive(Debug, Clone)]
pub struct ReservedWords {
    words: Vec<String>,
}

impl ReservedWords {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            words: words.into_iter().map(|w| w.into().to_lowercase()).collect(),
        }
    }
}

#[async_trait]
impl Validator for ReservedWords {
    async fn validate(&self, value: &str, context: &ValidationContext) -> Result<(), String> {
        if self.words.iter().any(|w| w.eq_ignore_ascii_case(value)) {
            return Err(format!("{} '{}' is reserved", context.field_name(), value));
        }
        Ok(())
    }
}

/// Structured formats with dedicated checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Format {
    Email,
    /// URL whose scheme must be one of the listed protocols
    Url { allowed_protocols: Vec<String> },
    /// At least three of: lowercase, uppercase, digit, symbol
    Password,
}

impl Format {
    /// Check `value`, returning the reason it is rejected
    pub fn check(&self, value: &str) -> Option<String> {
        match self {
            Format::Email => {
                if !EMAIL_RE.is_match(value) || value.contains("..") {
                    return Some("must be a valid email address".to_string());
                }
                None
            }
            Format::Url { allowed_protocols } => check_url(value, allowed_protocols),
            Format::Password => {
                let classes = [
                    value.chars().any(|c| c.is_lowercase()),
                    value.chars().any(|c| c.is_uppercase()),
                    value.chars().any(|c| c.is_ascii_digit()),
                    value.chars().any(|c| !c.is_alphanumeric()),
                ];
                if classes.iter().filter(|present| **present).count() < 3 {
                    return Some(
                        "must contain at least three of: lowercase, uppercase, digits, symbols"
                            .to_string(),
                    );
                }
                None
            }
        }
    }
}

fn check_url(value: &str, allowed_protocols: &[String]) -> Option<String> {
    let Some(captures) = SCHEME_RE.captures(value) else {
        return Some("must be an absolute URL".to_string());
    };

    let scheme = captures[1].to_lowercase();
    if !allowed_protocols.iter().any(|p| p.eq_ignore_ascii_case(&scheme)) {
        return Some(format!("protocol '{}' is not allowed", scheme));
    }

    let rest = &value[captures[0].len()..];
    if matches!(scheme.as_str(), "http" | "https") {
        let host = rest
            .strip_prefix("//")
            .map(|r| r.split(['/', '?', '#']).next().unwrap_or(""))
            .unwrap_or("");
        if host.is_empty() {
            return Some("must include a host".to_string());
        }
    } else if rest.is_empty() {
        return Some("must not be empty after the protocol".to_string());
    }

    if value.chars().any(char::is_whitespace) {
        return Some("must not contain whitespace".to_string());
    }

    None
}

/// Rules for one field
#[derive(Clone, Default)]
pub struct FieldSchema {
    pub required: bool,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<Regex>,
    pub format: Option<Format>,
    /// Pattern categories the security scan ignores for this field
    pub skip_categories: Vec<PatternCategory>,
    /// Reject numbers, booleans and containers
    pub string_only: bool,
    /// Lower-case the sanitized value
    pub lowercase: bool,
    /// Return the value untouched instead of sanitizing it
    pub preserve: bool,
    pub validators: Vec<Arc<dyn Validator>>,
}

impl fmt::Debug for FieldSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSchema")
            .field("required", &self.required)
            .field("min_length", &self.min_length)
            .field("max_length", &self.max_length)
            .field("pattern", &self.pattern.as_ref().map(Regex::as_str))
            .field("format", &self.format)
            .field("skip_categories", &self.skip_categories)
            .field("string_only", &self.string_only)
            .field("validators", &self.validators.len())
            .finish()
    }
}

impl FieldSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn skip_scan(mut self, categories: &[PatternCategory]) -> Self {
        self.skip_categories.extend_from_slice(categories);
        self
    }

    pub fn string_only(mut self) -> Self {
        self.string_only = true;
        self
    }

    pub fn lowercase(mut self) -> Self {
        self.lowercase = true;
        self
    }

    pub fn preserve(mut self) -> Self {
        self.preserve = true;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Built-in schemas, keyed by name
    pub fn builtins(config: &ValidatorConfig) -> Vec<(&'static str, FieldSchema)> {
        vec![
            (
                "email",
                FieldSchema::new()
                    .required()
                    .max_length(254)
                    .format(Format::Email)
                    .lowercase()
                    .string_only(),
            ),
            (
                "username",
                FieldSchema::new()
                    .required()
                    .min_length(3)
                    .max_length(32)
                    .pattern(USERNAME_RE.clone())
                    .string_only(),
            ),
            (
                "password",
                FieldSchema::new()
                    .required()
                    .min_length(8)
                    .max_length(128)
                    .format(Format::Password)
                    .skip_scan(&PatternCategory::ALL)
                    .preserve()
                    .string_only(),
            ),
            (
                "filename",
                FieldSchema::new()
                    .required()
                    .max_length(255)
                    .pattern(FILENAME_RE.clone())
                    .string_only(),
            ),
            (
                "markdown",
                FieldSchema::new()
                    .max_length(config.max_markdown_length)
                    .skip_scan(&[PatternCategory::CommandInjection])
                    .string_only(),
            ),
            (
                "url",
                FieldSchema::new()
                    .max_length(2048)
                    .format(Format::Url {
                        allowed_protocols: config.allowed_url_protocols.clone(),
                    })
                    .string_only(),
            ),
            ("text", FieldSchema::new().max_length(config.max_text_length)),
        ]
    }
}
