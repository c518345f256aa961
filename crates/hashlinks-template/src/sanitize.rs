//! Output escaping and a permissive HTML sanitizer.

use std::sync::LazyLock;

use regex::Regex;

static SCRIPT_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("valid script element pattern")
});
static SCRIPT_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?script\b[^>]*>").expect("valid script tag pattern")
});
static EVENT_HANDLER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\s+on[a-z]+\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#)
        .expect("valid event handler pattern")
});
static JAVASCRIPT_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)javascript\s*:").expect("valid javascript uri pattern"));

/// Entity-encode text for inclusion in HTML.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '`' => out.push_str("&#x60;"),
            '=' => out.push_str("&#x3D;"),
            c => out.push(c),
        }
    }
    out
}

/// Strip script elements, inline event-handler attributes and
/// `javascript:` URIs. Everything else passes through untouched.
pub fn sanitize_html(s: &str) -> String {
    let s = SCRIPT_ELEMENT.replace_all(s, "");
    let s = SCRIPT_TAG.replace_all(&s, "");
    let s = EVENT_HANDLER.replace_all(&s, "");
    JAVASCRIPT_URI.replace_all(&s, "").into_owned()
}
