//! CSRF token extraction
//!
//! The service embeds its anti-forgery token in a
//! `<meta name="csrf-token" content="...">` tag on every authenticated HTML
//! page. Extraction is kept in this one place so a markup change on the
//! service side only touches this module.

use std::sync::LazyLock;

use regex::Regex;

/// Page fetched to obtain a token
pub const TOKEN_PAGE: &str = "/files";

/// Header carrying the token on protected requests
pub const TOKEN_HEADER: &str = "X-CSRF-Token";

/// Value of the `name` attribute identifying the token tag
const META_NAME: &str = "csrf-token";

static META_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<meta\b[^>]*>").expect("valid meta tag regex"));

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)([a-z][a-z0-9_:-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>/]+))"#)
        .expect("valid attribute regex")
});

/// Extract the CSRF token from an HTML document
///
/// Returns `None` when no `csrf-token` meta tag with a non-empty `content`
/// attribute is present. Attribute order and quoting style do not matter.
pub fn extract_token(html: &str) -> Option<String> {
    META_TAG.find_iter(html).find_map(|tag| {
        let mut name = None;
        let mut content = None;

        for caps in ATTRIBUTE.captures_iter(tag.as_str()) {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str());
            match caps[1].to_ascii_lowercase().as_str() {
                "name" => name = value,
                "content" => content = value,
                _ => {}
            }
        }

        match (name, content) {
            (Some(n), Some(c)) if n.eq_ignore_ascii_case(META_NAME) => {
                let token = c.trim();
                (!token.is_empty()).then(|| token.to_string())
            }
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_token() {
        let html = r#"<html><head>
            <meta charset="utf-8">
            <meta name="csrf-token" content=" tok3n-value ">
            </head><body></body></html>"#;
        assert_eq!(extract_token(html), Some("tok3n-value".to_string()));
    }

    #[test]
    fn test_extract_token_attribute_order_and_quotes() {
        let html = "<META content='abc123' NAME='csrf-token' />";
        assert_eq!(extract_token(html), Some("abc123".to_string()));
    }

    #[test]
    fn test_extract_token_skips_other_meta_tags() {
        let html = r#"<meta name="viewport" content="width=device-width">
                      <meta name="csrf-token" content="right">"#;
        assert_eq!(extract_token(html), Some("right".to_string()));
    }

    #[test]
    fn test_extract_token_missing() {
        assert_eq!(extract_token("<html><body>login</body></html>"), None);
        assert_eq!(extract_token(r#"<meta name="csrf-token" content="">"#), None);
        assert_eq!(extract_token(r#"<meta name="csrf-token">"#), None);
    }
}
