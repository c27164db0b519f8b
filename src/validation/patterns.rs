//! Static catalog of suspicious-input patterns

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::events::SecurityEventType;

/// Attack family a pattern belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternCategory {
    SqlInjection,
    Xss,
    PathTraversal,
    CommandInjection,
}

impl PatternCategory {
    pub const ALL: [PatternCategory; 4] = [
        Self::SqlInjection,
        Self::Xss,
        Self::PathTraversal,
        Self::CommandInjection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SqlInjection => "sql_injection",
            Self::Xss => "xss",
            Self::PathTraversal => "path_traversal",
            Self::CommandInjection => "command_injection",
        }
    }

    /// Event type raised when a pattern of this family matches
    pub fn event_type(&self) -> SecurityEventType {
        match self {
            Self::SqlInjection => SecurityEventType::SqlInjectionAttempt,
            Self::Xss => SecurityEventType::XssAttempt,
            Self::PathTraversal => SecurityEventType::PathTraversalAttempt,
            Self::CommandInjection => SecurityEventType::CommandInjectionAttempt,
        }
    }
}

impl std::fmt::Display for PatternCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One compiled catalog entry
#[derive(Debug)]
pub struct ScanPattern {
    pub name: &'static str,
    pub category: PatternCategory,
    pub regex: Regex,
}

/// A catalog pattern that matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanHit {
    pub category: PatternCategory,
    pub pattern: &'static str,
}

const PATTERN_SOURCES: &[(&str, PatternCategory, &str)] = &[
    (
        "union_select",
        PatternCategory::SqlInjection,
        r"(?i)\bunion\b[\s/*]+(?:all[\s/*]+)?select\b",
    ),
    (
        "tautology",
        PatternCategory::SqlInjection,
        r#"(?i)['"]\s*(?:or|and)\s+['"]?\w+['"]?\s*=\s*['"]?\w+"#,
    ),
    (
        "stacked_statement",
        PatternCategory::SqlInjection,
        r"(?i);\s*(?:drop\s+(?:table|database)|truncate\s+table|alter\s+table|delete\s+from|insert\s+into|update\s+\w+\s+set)\b",
    ),
    (
        "comment_terminator",
        PatternCategory::SqlInjection,
        r"(?i)'\s*(?:--|#|/\*)",
    ),
    (
        "timing_function",
        PatternCategory::SqlInjection,
        r"(?i)\b(?:sleep|benchmark|pg_sleep)\s*\(\s*\d|\bwaitfor\s+delay\b",
    ),
    ("script_tag", PatternCategory::Xss, r"(?i)<\s*/?\s*script\b"),
    (
        "event_handler",
        PatternCategory::Xss,
        r"(?i)<[^>]*[\s/]on[a-z]+\s*=",
    ),
    (
        "script_protocol",
        PatternCategory::Xss,
        r"(?i)\b(?:javascript|vbscript|livescript)\s*:",
    ),
    ("html_data_uri", PatternCategory::Xss, r"(?i)data:\s*text/html"),
    (
        "embedding_tag",
        PatternCategory::Xss,
        r"(?i)<\s*(?:iframe|object|embed|applet|meta|base|frameset)\b",
    ),
    ("dot_dot_slash", PatternCategory::PathTraversal, r"\.\.[/\\]|[/\\]\.\.(?:[/\\]|$)"),
    (
        "encoded_traversal",
        PatternCategory::PathTraversal,
        r"(?i)(?:%2e|%252e){2}(?:%2f|%5c|%252f|/|\\)|\.\.(?:%2f|%5c|%252f)",
    ),
    (
        "sensitive_file",
        PatternCategory::PathTraversal,
        r"(?i)/etc/(?:passwd|shadow)\b|\b(?:boot|win)\.ini\b",
    ),
    (
        "shell_chain",
        PatternCategory::CommandInjection,
        r"(?:;|&&|\|\||\|)\s*(?:rm|cat|curl|wget|nc|ncat|bash|sh|zsh|chmod|chown|whoami|uname|powershell|cmd)\b",
    ),
    (
        "command_substitution",
        PatternCategory::CommandInjection,
        r"\$\([^)]*\)|`\s*(?:rm|cat|curl|wget|nc|bash|sh|whoami|uname|id)\b[^`]*`",
    ),
    ("ifs_evasion", PatternCategory::CommandInjection, r"\$\{?IFS\}?"),
];

static CATALOG: LazyLock<Vec<ScanPattern>> = LazyLock::new(|| {
    PATTERN_SOURCES
        .iter()
        .map(|&(name, category, source)| ScanPattern {
            name,
            category,
            regex: Regex::new(source).expect("invalid security scan pattern"),
        })
        .collect()
});

/// The compiled catalog
pub fn catalog() -> &'static [ScanPattern] {
    &CATALOG
}

/// Every pattern matching `text`
pub fn scan(text: &str) -> Vec<ScanHit> {
    scan_excluding(text, &[])
}

/// Every pattern matching `text`, skipping the listed categories
pub fn scan_excluding(text: &str, skip: &[PatternCategory]) -> Vec<ScanHit> {
    CATALOG
        .iter()
        .filter(|p| !skip.contains(&p.category))
        .filter(|p| p.regex.is_match(text))
        .map(|p| ScanHit {
            category: p.category,
            pattern: p.name,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories(text: &str) -> Vec<PatternCategory> {
        let mut found: Vec<_> = scan(text).into_iter().map(|h| h.category).collect();
        found.dedup();
        found
    }

    #[test]
    fn test_catalog_compiles() {
        assert_eq!(catalog().len(), PATTERN_SOURCES.len());
    }

    #[test]
    fn test_sql_injection_detected() {
        assert_eq!(categories("' OR '1'='1"), vec![PatternCategory::SqlInjection]);
        assert_eq!(categories("1 UNION SELECT password FROM users"), vec![PatternCategory::SqlInjection]);
        assert_eq!(categories("x'; DROP TABLE users"), vec![PatternCategory::SqlInjection]);
        assert_eq!(categories("admin'--"), vec![PatternCategory::SqlInjection]);
    }

    #[test]
    fn test_xss_detected() {
        assert_eq!(categories("<script>alert(1)</script>"), vec![PatternCategory::Xss]);
        assert_eq!(categories("<img src=x onerror=alert(1)>"), vec![PatternCategory::Xss]);
        assert_eq!(categories("javascript:alert(1)"), vec![PatternCategory::Xss]);
        assert_eq!(categories("<iframe src=evil>"), vec![PatternCategory::Xss]);
    }

    #[test]
    fn test_path_traversal_detected() {
        assert_eq!(categories("../../etc/passwd"), vec![PatternCategory::PathTraversal]);
        assert_eq!(categories("%2e%2e%2fsecret"), vec![PatternCategory::PathTraversal]);
        assert_eq!(categories("..\\windows\\win.ini"), vec![PatternCategory::PathTraversal]);
    }

    #[test]
    fn test_command_injection_detected() {
        assert_eq!(categories("foo; rm -rf /"), vec![PatternCategory::CommandInjection]);
        assert_eq!(categories("$(whoami)"), vec![PatternCategory::CommandInjection]);
        assert_eq!(categories("a${IFS}b"), vec![PatternCategory::CommandInjection]);
    }

    #[test]
    fn test_benign_text_passes() {
        for text in [
            "Hello, world!",
            "Meeting notes: discuss the Q3 roadmap and hiring.",
            "alice@example.com",
            "Use the `format` function for strings.",
            "Prices went up 3% this year",
            "Select the union of both sets",
        ] {
            assert!(scan(text).is_empty(), "false positive on {:?}", text);
        }
    }

    #[test]
    fn test_skip_categories() {
        let text = "run this | cat file";
        assert!(!scan(text).is_empty());
        assert!(scan_excluding(text, &[PatternCategory::CommandInjection]).is_empty());
    }
}
