//! Allow-list HTML sanitizer
//!
//! Each pass drops comments, `script`/`style` elements and every tag or
//! attribute outside the allow-list, and re-emits kept tags in a canonical
//! form. Passes repeat until the output stops changing, so sanitizing
//! sanitized HTML is a no-op.

use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Upper bound on sanitizer passes
const MAX_PASSES: usize = 16;

static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?(?:-->|$)").expect("comment regex"));

static SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<\s*script\b[^>]*>.*?(?:<\s*/\s*script\s*>|$)").expect("script regex")
});

static STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<\s*style\b[^>]*>.*?(?:<\s*/\s*style\s*>|$)").expect("style regex")
});

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\s*(/?)\s*([A-Za-z][A-Za-z0-9]*)([^>]*)>").expect("tag regex"));

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
        .expect("attribute regex")
});

/// What the sanitizer keeps
#[derive(Debug, Clone)]
pub struct HtmlOptions {
    pub allowed_tags: Vec<String>,
    pub allowed_attributes: Vec<String>,
    /// Schemes accepted in `href` and `src`
    pub allowed_protocols: Vec<String>,
}

impl Default for HtmlOptions {
    fn default() -> Self {
        let tags = [
            "a", "b", "blockquote", "br", "code", "em", "h1", "h2", "h3", "h4", "h5", "h6", "hr",
            "i", "img", "li", "ol", "p", "pre", "s", "span", "strong", "table", "tbody", "td",
            "th", "thead", "tr", "u", "ul",
        ];
        Self {
            allowed_tags: tags.iter().map(|t| t.to_string()).collect(),
            allowed_attributes: ["href", "src", "alt", "title", "class"]
                .iter()
                .map(|a| a.to_string())
                .collect(),
            allowed_protocols: ["http", "https", "mailto"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl HtmlOptions {
    fn allows_tag(&self, name: &str) -> bool {
        self.allowed_tags.iter().any(|t| t.eq_ignore_ascii_case(name))
    }

    fn allows_attribute(&self, name: &str) -> bool {
        self.allowed_attributes.iter().any(|a| a.eq_ignore_ascii_case(name))
    }

    fn allows_url(&self, value: &str) -> bool {
        // Browsers ignore whitespace and control characters inside the scheme
        let compact: String = value
            .chars()
            .filter(|c| !c.is_whitespace() && !c.is_control())
            .collect::<String>()
            .to_lowercase();

        if compact.contains("&#") || compact.contains("&colon") {
            return false;
        }

        match compact.find(':') {
            Some(colon) if !compact[..colon].contains(['/', '?', '#']) => {
                let scheme = &compact[..colon];
                self.allowed_protocols.iter().any(|p| p.eq_ignore_ascii_case(scheme))
            }
            _ => true,
        }
    }
}

/// Sanitizer output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlSanitization {
    pub html: String,
    pub modified: bool,
}

/// Sanitize `html` to a fixed point
pub fn sanitize_html(html: &str, options: &HtmlOptions) -> HtmlSanitization {
    let mut current = html.to_string();

    for _ in 0..MAX_PASSES {
        let next = sanitize_pass(&current, options);
        if next == current {
            break;
        }
        current = next;
    }

    HtmlSanitization {
        modified: current != html,
        html: current,
    }
}

fn sanitize_pass(html: &str, options: &HtmlOptions) -> String {
    let without_comments = COMMENT_RE.replace_all(html, "");
    let without_scripts = SCRIPT_RE.replace_all(&without_comments, "");
    let without_styles = STYLE_RE.replace_all(&without_scripts, "");

    TAG_RE
        .replace_all(&without_styles, |caps: &Captures| rewrite_tag(caps, options))
        .into_owned()
}

fn rewrite_tag(caps: &Captures, options: &HtmlOptions) -> String {
    let closing = !caps[1].is_empty();
    let name = caps[2].to_lowercase();

    if !options.allows_tag(&name) {
        return String::new();
    }

    if closing {
        return format!("</{}>", name);
    }

    let mut tag = format!("<{}", name);
    for attr in ATTR_RE.captures_iter(&caps[3]) {
        let attr_name = attr[1].to_lowercase();
        if !options.allows_attribute(&attr_name) {
            continue;
        }

        let value = attr
            .get(2)
            .or_else(|| attr.get(3))
            .or_else(|| attr.get(4))
            .map(|m| m.as_str())
            .unwrap_or("");

        if matches!(attr_name.as_str(), "href" | "src") && !options.allows_url(value) {
            continue;
        }

        let value = value.replace('"', "&quot;").replace('<', "&lt;");
        tag.push_str(&format!(" {}=\"{}\"", attr_name, value));
    }
    tag.push('>');
    tag
}
