//! Schema-driven input validation and sanitization
//!
//! Validation runs in two passes. The first applies the field schema
//! (presence, length, pattern, format, custom validators) to the sanitized
//! value. The second scans every string against the static pattern catalog;
//! any hit fails the result and raises a high-risk event for the matching
//! attack family.

pub mod html;
pub mod patterns;
pub mod schema;
pub mod upload;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};
use unicode_normalization::{is_nfc, UnicodeNormalization};

use crate::config::ValidatorConfig;
use crate::events::{RiskLevel, SecurityEvent, SecurityEventType};

pub use html::{sanitize_html, HtmlOptions, HtmlSanitization};
pub use patterns::{PatternCategory, ScanHit};
pub use schema::{FieldSchema, Format, ReservedWords, ValidationContext, Validator};
pub use upload::FileUpload;

/// Outcome of a validation call.
///
/// A result with errors never carries a sanitized value.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub sanitized: Option<Value>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Security events raised while validating
    pub events: Vec<SecurityEvent>,
}

impl ValidationResult {
    fn finish(mut self, sanitized: Value) -> Self {
        self.is_valid = self.errors.is_empty();
        self.sanitized = if self.is_valid { Some(sanitized) } else { None };
        self
    }

    /// Highest risk among the raised events
    pub fn highest_risk(&self) -> Option<RiskLevel> {
        self.events.iter().map(|e| e.risk_level).max()
    }

    /// Event with the highest risk, earliest first on ties
    pub fn primary_event(&self) -> Option<&SecurityEvent> {
        self.events
            .iter()
            .rev()
            .max_by_key(|e| e.risk_level)
    }

    /// Fold another result into this one
    pub fn absorb(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.events.extend(other.events);
    }
}

/// Strip null and control characters (keeping whitespace), NFC-normalize and trim
pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .nfc()
        .collect::<String>()
        .trim()
        .to_string()
}

/// Input validator with a registry of named schemas
pub struct InputValidator {
    config: ValidatorConfig,
    schemas: DashMap<String, FieldSchema>,
}

impl InputValidator {
    /// Create a validator preloaded with the built-in schemas
    pub fn new(config: ValidatorConfig) -> Self {
        let schemas = DashMap::new();
        for (name, schema) in FieldSchema::builtins(&config) {
            schemas.insert(name.to_string(), schema);
        }
        Self { config, schemas }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Register or replace a named schema
    pub fn register_schema(&self, name: impl Into<String>, schema: FieldSchema) {
        let name = name.into();
        debug!("Registered validation schema '{}'", name);
        self.schemas.insert(name, schema);
    }

    /// Look up a named schema
    pub fn schema(&self, name: &str) -> Option<FieldSchema> {
        self.schemas.get(name).map(|s| s.value().clone())
    }

    /// Scan text against the full pattern catalog
    pub fn scan(&self, text: &str) -> Vec<ScanHit> {
        patterns::scan(text)
    }

    /// Validate against a registered schema
    pub async fn validate_named(
        &self,
        value: &Value,
        schema_name: &str,
        context: &ValidationContext,
    ) -> ValidationResult {
        match self.schema(schema_name) {
            Some(schema) => self.validate_input(value, &schema, context).await,
            None => {
                warn!("Validation requested with unknown schema '{}'", schema_name);
                let mut result = ValidationResult::default();
                result.errors.push(format!("unknown schema '{}'", schema_name));
                result.finish(Value::Null)
            }
        }
    }

    /// Validate and sanitize one value
    pub async fn validate_input(
        &self,
        value: &Value,
        schema: &FieldSchema,
        context: &ValidationContext,
    ) -> ValidationResult {
        let field = context.field_name().to_string();
        let mut result = ValidationResult::default();

        let sanitized = match value {
            Value::Null => {
                if schema.required {
                    result.errors.push(format!("{} is required", field));
                }
                Value::Null
            }
            Value::String(text) => {
                Value::String(self.validate_string(text, schema, context, &mut result).await)
            }
            Value::Bool(_) | Value::Number(_) => {
                if schema.string_only {
                    result.errors.push(format!("{} must be a string", field));
                }
                value.clone()
            }
            Value::Array(_) | Value::Object(_) => {
                if schema.string_only {
                    result.errors.push(format!("{} must be a string", field));
                }
                self.scan_nested(value, schema, context, &mut result)
            }
        };

        if !result.errors.is_empty() {
            debug!(field = %field, errors = ?result.errors, "Validation failed");
        }

        result.finish(sanitized)
    }

    async fn validate_string(
        &self,
        text: &str,
        schema: &FieldSchema,
        context: &ValidationContext,
        result: &mut ValidationResult,
    ) -> String {
        let field = context.field_name();
        self.collect_warnings(text, field, result);

        let mut sanitized = if schema.preserve {
            text.to_string()
        } else {
            sanitize_text(text)
        };
        if schema.lowercase {
            sanitized = sanitized.to_lowercase();
        }

        if sanitized.is_empty() {
            if schema.required {
                result.errors.push(format!("{} is required", field));
            }
            return sanitized;
        }

        let length = sanitized.chars().count();
        if let Some(min) = schema.min_length {
            if length < min {
                result
                    .errors
                    .push(format!("{} must be at least {} characters", field, min));
            }
        }
        if let Some(max) = schema.max_length {
            if length > max {
                result
                    .errors
                    .push(format!("{} must be at most {} characters", field, max));
            }
        }

        if let Some(pattern) = &schema.pattern {
            if !pattern.is_match(&sanitized) {
                result.errors.push(format!("{} has an invalid format", field));
            }
        }

        if let Some(format) = &schema.format {
            if let Some(reason) = format.check(&sanitized) {
                result.errors.push(format!("{} {}", field, reason));
            }
        }

        for validator in &schema.validators {
            if let Err(message) = validator.validate(&sanitized, context).await {
                result.errors.push(message);
            }
        }

        self.scan_string(&sanitized, schema, context, result);
        sanitized
    }

    fn collect_warnings(&self, text: &str, field: &str, result: &mut ValidationResult) {
        if text.len() > self.config.large_input_warning {
            result.warnings.push(format!(
                "{} is unusually large ({} bytes)",
                field,
                text.len()
            ));
        }
        if text.contains('\0') {
            result.warnings.push(format!("{} contains null bytes", field));
        }
        if !is_nfc(text) {
            result
                .warnings
                .push(format!("{} is not NFC-normalized", field));
        }
    }

    fn scan_string(
        &self,
        text: &str,
        schema: &FieldSchema,
        context: &ValidationContext,
        result: &mut ValidationResult,
    ) {
        let hits = patterns::scan_excluding(text, &schema.skip_categories);
        let mut reported: Vec<PatternCategory> = Vec::new();

        for hit in hits {
            if reported.contains(&hit.category) {
                continue;
            }
            reported.push(hit.category);

            warn!(
                field = context.field_name(),
                category = %hit.category,
                pattern = hit.pattern,
                "Suspicious input detected"
            );

            result.errors.push(format!(
                "{} contains potentially malicious content ({})",
                context.field_name(),
                hit.category
            ));
            result.events.push(
                context
                    .event(hit.category.event_type(), RiskLevel::High)
                    .with_detail("class", SecurityEventType::MaliciousInput.as_str())
                    .with_detail("category", hit.category.as_str())
                    .with_detail("pattern", hit.pattern)
                    .with_detail("sample", preview(text)),
            );
        }
    }

    /// Scan every string inside a container; returns the sanitized copy
    fn scan_nested(
        &self,
        value: &Value,
        schema: &FieldSchema,
        context: &ValidationContext,
        result: &mut ValidationResult,
    ) -> Value {
        match value {
            Value::String(text) => {
                self.collect_warnings(text, context.field_name(), result);
                let sanitized = sanitize_text(text);
                self.scan_string(&sanitized, schema, context, result);
                Value::String(sanitized)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.scan_nested(item, schema, context, result))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, item)| {
                        let nested = context.for_field(format!("{}.{}", context.field_name(), key));
                        (key.clone(), self.scan_nested(item, schema, &nested, result))
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Check a file's name, size and type against the upload policy
    pub fn validate_file_upload(
        &self,
        file: &FileUpload,
        context: &ValidationContext,
    ) -> ValidationResult {
        let findings = upload::inspect(file, &self.config.upload);
        let mut result = ValidationResult::default();

        if let Some(risk) = findings.risk {
            warn!(
                file = %file.name,
                errors = ?findings.errors,
                "File upload blocked"
            );
            result.events.push(
                context
                    .event(SecurityEventType::FileUploadBlocked, risk)
                    .with_detail("file_name", file.name.clone())
                    .with_detail("file_size", file.size)
                    .with_detail("mime_type", file.mime_type.clone())
                    .with_detail("reasons", findings.errors.clone()),
            );
        }
        result.errors = findings.errors;

        let metadata = serde_json::json!({
            "name": file.name.trim(),
            "size": file.size,
            "mime_type": file.mime_type,
        });
        result.finish(metadata)
    }

    /// Sanitize HTML; a modification is reported as a warning and a medium-risk event
    pub fn validate_html_content(
        &self,
        html: &str,
        options: &HtmlOptions,
        context: &ValidationContext,
    ) -> ValidationResult {
        let cleaned = sanitize_html(html, options);
        let mut result = ValidationResult::default();

        if cleaned.modified {
            result.warnings.push(format!(
                "{} contained disallowed HTML that was removed",
                context.field_name()
            ));
            result.events.push(
                context
                    .event(SecurityEventType::XssAttempt, RiskLevel::Medium)
                    .with_detail("original_length", html.len())
                    .with_detail("sanitized_length", cleaned.html.len()),
            );
        }

        result.finish(Value::String(cleaned.html))
    }

    /// Sanitize HTML with the given options
    pub fn sanitize_html(&self, html: &str, options: &HtmlOptions) -> HtmlSanitization {
        sanitize_html(html, options)
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new(ValidatorConfig::default())
    }
}

/// First characters of a flagged value, for event details
fn preview(text: &str) -> String {
    const PREVIEW_CHARS: usize = 64;
    text.chars().take(PREVIEW_CHARS).collect()
}
