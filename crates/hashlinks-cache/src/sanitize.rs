//! Content-type classification and per-kind sanitizers.

use std::sync::LazyLock;

use regex::Regex;

use hashlinks_types::ResourceKind;

static CSS_EXPRESSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)expression\s*\(").expect("static regex"));
static CSS_DANGEROUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)javascript\s*:|behavior\s*:|-moz-binding\s*:?").expect("static regex")
});
static CSS_IMPORT_JS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)@import\s+(url\()?\s*['"]?\s*javascript:[^;]*;?"#).expect("static regex")
});

static JS_EVAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\beval\s*\(").expect("static regex"));
static JS_FUNCTION_CTOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bnew\s+Function\s*\(").expect("static regex"));
static JS_DOCUMENT_WRITE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bdocument\s*\.\s*write(ln)?\s*\(").expect("static regex"));
static JS_HANDLER_INJECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\.\s*(on[a-z]+)\s*=\s*['"]"#).expect("static regex")
});
static JS_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)javascript\s*:").expect("static regex"));

/// Map a declared content type onto a resource kind.
///
/// Parameters after `;` are ignored and matching is case-insensitive.
pub fn classify(content_type: &str) -> Option<ResourceKind> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "text/css" => Some(ResourceKind::Style),
        "application/javascript"
        | "text/javascript"
        | "application/x-javascript"
        | "application/ecmascript"
        | "text/ecmascript" => Some(ResourceKind::Script),
        "text/html"
        | "text/plain"
        | "application/xhtml+xml"
        | "text/x-handlebars-template" => Some(ResourceKind::Template),
        other if other.starts_with("image/") => Some(ResourceKind::Image),
        _ => None,
    }
}

/// Strip constructs in a stylesheet that can run code.
pub fn sanitize_style(css: &str) -> String {
    let css = CSS_IMPORT_JS.replace_all(css, "");
    let css = CSS_EXPRESSION.replace_all(&css, "(");
    CSS_DANGEROUS.replace_all(&css, "").into_owned()
}

/// Neutralize dynamic code execution, direct document writes, handler
/// injection and `javascript:` URIs in a script.
///
/// Neutralized calls are rewritten to a call of an undefined identifier, so
/// the script still parses and fails loudly when the call is reached.
pub fn sanitize_script(js: &str) -> String {
    let js = JS_EVAL.replace_all(js, "__blocked_eval(");
    let js = JS_FUNCTION_CTOR.replace_all(&js, "__blocked_function(");
    let js = JS_DOCUMENT_WRITE.replace_all(&js, "__blocked_write(");
    let js = JS_HANDLER_INJECTION.replace_all(&js, ".__blocked_${1} = \"");
    JS_URI.replace_all(&js, "blocked:").into_owned()
}

/// Apply the sanitizer for `kind`. Images pass through untouched.
pub fn sanitize(kind: ResourceKind, text: &str) -> String {
    match kind {
        ResourceKind::Style => sanitize_style(text),
        ResourceKind::Script => sanitize_script(text),
        ResourceKind::Template => hashlinks_template::sanitize_html(text),
        ResourceKind::Image => text.to_string(),
    }
}
