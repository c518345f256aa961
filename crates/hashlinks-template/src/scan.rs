//! Extraction of embedded HashLink references from template output.
//!
//! A reference is any element carrying the marker attribute
//! (`data-hashlink` by default). Overrides live on the same element:
//! `data-attributes` (JSON object), `data-actions` (JSON object of action
//! name to action reference) and `data-loading="lazy"`.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;
use tracing::warn;

use hashlinks_types::{
    ActionMap, Attributes, BlockReference, HashLinkUri, LoadingMode, SourceSpan,
};

use crate::error::ScanError;

pub const DEFAULT_MARKER: &str = "data-hashlink";
const ATTRIBUTES_ATTR: &str = "data-attributes";
const ACTIONS_ATTR: &str = "data-actions";
const LOADING_ATTR: &str = "data-loading";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Everything found in one body. A bad occurrence lands in `errors` and
/// never hides the others.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScanReport {
    pub references: Vec<BlockReference>,
    pub errors: Vec<ScanError>,
}

impl ScanReport {
    pub fn is_empty(&self) -> bool {
        self.references.is_empty() && self.errors.is_empty()
    }
}

/// Scans template bodies for elements carrying a marker attribute.
#[derive(Debug, Clone)]
pub struct HashLinkScanner {
    marker: String,
}

impl Default for HashLinkScanner {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER)
    }
}

impl HashLinkScanner {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into().to_ascii_lowercase(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Occurrences in document order. Nested markers inside a matched
    /// element belong to that element's content and are not reported.
    pub fn scan(&self, body: &str) -> ScanReport {
        let mut report = ScanReport::default();
        let mut pos = 0;

        while let Some(tag) = next_open_tag(body, pos) {
            let Some(raw_uri) = tag.attribute(&self.marker) else {
                pos = tag.end;
                continue;
            };

            let end = if tag.self_closing || VOID_ELEMENTS.contains(&tag.name.as_str()) {
                tag.end
            } else {
                matching_close(body, &tag.name, tag.end).unwrap_or(tag.end)
            };
            let span = SourceSpan::new(tag.start, end);
            pos = end;

            let uri = decode_entities(raw_uri);
            let link = match HashLinkUri::parse(uri.trim()) {
                Ok(link) => link,
                Err(error) => {
                    warn!(uri = %uri, %error, "skipping malformed HashLink");
                    report.errors.push(ScanError { span, uri, error });
                    continue;
                }
            };

            let loading = match tag.attribute(LOADING_ATTR) {
                Some(mode) if mode.trim().eq_ignore_ascii_case("lazy") => LoadingMode::Lazy,
                _ => LoadingMode::Eager,
            };

            report.references.push(BlockReference {
                inline_attributes: tag
                    .attribute(ATTRIBUTES_ATTR)
                    .and_then(|raw| parse_attributes(&link, raw)),
                inline_actions: tag
                    .attribute(ACTIONS_ATTR)
                    .and_then(|raw| parse_actions(&link, raw)),
                link,
                tag_name: tag.name,
                loading,
                span,
                element: body[span.start..span.end].to_string(),
            });
        }
        report
    }
}

/// Scan with the default marker attribute.
pub fn scan(body: &str) -> ScanReport {
    HashLinkScanner::default().scan(body)
}

/// Replace each span of `body` with its text. Spans must be sorted and
/// non-overlapping.
pub fn splice(body: &str, replacements: &[(SourceSpan, String)]) -> String {
    let mut out = String::with_capacity(body.len());
    let mut pos = 0;
    for (span, text) in replacements {
        out.push_str(&body[pos..span.start]);
        out.push_str(text);
        pos = span.end;
    }
    out.push_str(&body[pos..]);
    out
}

fn parse_attributes(link: &HashLinkUri, raw: &str) -> Option<Attributes> {
    match serde_json::from_str::<Value>(&decode_entities(raw)) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => {
            warn!(uri = %link, "data-attributes is not a JSON object, ignoring");
            None
        }
        Err(error) => {
            warn!(uri = %link, %error, "malformed data-attributes JSON, ignoring");
            None
        }
    }
}

fn parse_actions(link: &HashLinkUri, raw: &str) -> Option<ActionMap> {
    match serde_json::from_str::<ActionMap>(&decode_entities(raw)) {
        Ok(actions) => Some(actions),
        Err(error) => {
            warn!(uri = %link, %error, "malformed data-actions JSON, ignoring");
            None
        }
    }
}

static CHARACTER_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:#([0-9]{1,7})|#[xX]([0-9a-fA-F]{1,6})|(quot|apos|lt|gt|amp));")
        .expect("valid character reference pattern")
});

/// Decode named and numeric character references in one pass, so `&amp;lt;`
/// becomes `&lt;` and not `<`. Invalid code points are left as written.
fn decode_entities(s: &str) -> String {
    CHARACTER_REFERENCE
        .replace_all(s, |caps: &Captures<'_>| {
            let decoded = if let Some(decimal) = caps.get(1) {
                decimal.as_str().parse().ok().and_then(char::from_u32)
            } else if let Some(hex) = caps.get(2) {
                u32::from_str_radix(hex.as_str(), 16).ok().and_then(char::from_u32)
            } else {
                match caps.get(3).map(|m| m.as_str()) {
                    Some("quot") => Some('"'),
                    Some("apos") => Some('\''),
                    Some("lt") => Some('<'),
                    Some("gt") => Some('>'),
                    Some("amp") => Some('&'),
                    _ => None,
                }
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

// ---------------------------------------------------------------------------
// Tag scanning
// ---------------------------------------------------------------------------

struct OpenTag<'a> {
    name: String,
    start: usize,
    end: usize,
    self_closing: bool,
    attributes: Vec<(String, &'a str)>,
}

impl<'a> OpenTag<'a> {
    fn attribute(&self, name: &str) -> Option<&'a str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
    }
}

fn next_open_tag(body: &str, from: usize) -> Option<OpenTag<'_>> {
    let bytes = body.as_bytes();
    let mut search = from;
    loop {
        let start = search + body[search..].find('<')?;
        if body[start..].starts_with("<!--") {
            // Markers inside comments are not references. An unclosed
            // comment runs to the end of the body.
            search = start + 4 + body[start + 4..].find("-->")? + 3;
            continue;
        }
        let name_start = start + 1;
        if !bytes.get(name_start).is_some_and(u8::is_ascii_alphabetic) {
            search = name_start;
            continue;
        }
        let mut i = name_start;
        while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-') {
            i += 1;
        }
        let name = body[name_start..i].to_ascii_lowercase();
        // An unterminated tag ends the scan.
        let (attributes, end, self_closing) = parse_attributes_until_close(body, i)?;
        return Some(OpenTag {
            name,
            start,
            end,
            self_closing,
            attributes,
        });
    }
}

type ParsedAttributes<'a> = (Vec<(String, &'a str)>, usize, bool);

fn parse_attributes_until_close(body: &str, mut i: usize) -> Option<ParsedAttributes<'_>> {
    let bytes = body.as_bytes();
    let mut attributes = Vec::new();
    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        match bytes.get(i)? {
            b'>' => return Some((attributes, i + 1, false)),
            b'/' if bytes.get(i + 1) == Some(&b'>') => return Some((attributes, i + 2, true)),
            b'/' => {
                i += 1;
                continue;
            }
            _ => {}
        }

        let name_start = i;
        while i < bytes.len()
            && !matches!(bytes[i], b'=' | b'>' | b'/')
            && !bytes[i].is_ascii_whitespace()
        {
            i += 1;
        }
        let name = body[name_start..i].to_ascii_lowercase();
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if bytes.get(i) != Some(&b'=') {
            attributes.push((name, ""));
            continue;
        }
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let value = match bytes.get(i)? {
            quote @ (b'"' | b'\'') => {
                let value_start = i + 1;
                let close = body[value_start..].find(*quote as char)?;
                i = value_start + close + 1;
                &body[value_start..value_start + close]
            }
            _ => {
                let value_start = i;
                while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                    i += 1;
                }
                &body[value_start..i]
            }
        };
        attributes.push((name, value));
    }
}

/// End offset of the close tag matching an element opened before `from`,
/// accounting for nested elements with the same name.
fn matching_close(body: &str, name: &str, from: usize) -> Option<usize> {
    let lower = body.to_ascii_lowercase();
    let open = format!("<{name}");
    let close = format!("</{name}");
    let mut depth = 1usize;
    let mut pos = from;
    loop {
        let next_open = find_tag(&lower, &open, pos);
        let next_close = find_tag(&lower, &close, pos)?;
        match next_open {
            Some(o) if o < next_close => {
                depth += 1;
                pos = o + open.len();
            }
            _ => {
                depth -= 1;
                let end = next_close + lower[next_close..].find('>')? + 1;
                if depth == 0 {
                    return Some(end);
                }
                pos = end;
            }
        }
    }
}

/// Position of `needle` at or after `from` where it is followed by a tag
/// name boundary, so `<div` does not match `<divider`.
fn find_tag(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let mut search = from;
    loop {
        let at = search + haystack[search..].find(needle)?;
        let after = haystack.as_bytes().get(at + needle.len()).copied();
        let boundary = match after {
            None | Some(b'>' | b'/') => true,
            Some(b) => b.is_ascii_whitespace(),
        };
        if boundary {
            return Some(at);
        }
        search = at + needle.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashlinks_types::{Protocol, TypeError};
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn finds_block_reference_with_span() {
        let body = r#"<p>before</p><div data-hashlink="hcs://12/0.0.123">loading</div><p>after</p>"#;
        let report = scan(body);
        assert!(report.errors.is_empty());
        let r = &report.references[0];
        assert_eq!(r.protocol(), Protocol::Block);
        assert_eq!(r.protocol_id(), "12");
        assert_eq!(r.reference(), "0.0.123");
        assert_eq!(r.tag_name, "div");
        assert_eq!(r.loading, LoadingMode::Eager);
        assert_eq!(
            &body[r.span.start..r.span.end],
            r#"<div data-hashlink="hcs://12/0.0.123">loading</div>"#
        );
        assert_eq!(r.element, &body[r.span.start..r.span.end]);
    }

    #[test]
    fn registry_reference_decomposes() {
        let report = scan(r#"<span data-hashlink="hcs://2/0.0.9/button"/>"#);
        let r = &report.references[0];
        assert_eq!(r.registry_id(), Some("0.0.9"));
        assert_eq!(r.entry_name(), Some("button"));
        assert_eq!(r.span, SourceSpan::new(0, 44));
    }

    #[test]
    fn overrides_are_decoded() {
        let body = r#"<div data-hashlink="hcs://12/0.0.1" data-attributes="{&quot;count&quot;:5,&quot;label&quot;:&quot;a &amp; b&quot;}" data-actions='{"increment":"0.0.77"}' data-loading="lazy"></div>"#;
        let r = &scan(body).references[0];
        assert_eq!(
            Value::Object(r.inline_attributes.clone().unwrap()),
            json!({"count": 5, "label": "a & b"})
        );
        assert_eq!(r.inline_actions.as_ref().unwrap()["increment"], "0.0.77");
        assert_eq!(r.loading, LoadingMode::Lazy);
    }

    #[test]
    fn escaped_template_output_scans_back_to_the_original_text() {
        let engine = crate::TemplateEngine::new();
        let body = engine
            .render(
                r#"<div data-hashlink="hcs://12/0.0.1" data-attributes='{"t":"{{t}}"}'></div>"#,
                &json!({ "t": "it's a=b & `c` <d>" }),
            )
            .unwrap();
        let r = &scan(&body).references[0];
        assert_eq!(r.inline_attributes.as_ref().unwrap()["t"], "it's a=b & `c` <d>");
    }

    #[test]
    fn numeric_references_decode_once() {
        assert_eq!(decode_entities("&#65;&#x42;&#X43;&amp;lt;&#xD800;&bogus;"), "ABC&lt;&#xD800;&bogus;");
    }

    #[test]
    fn commented_out_references_are_skipped() {
        let body = concat!(
            r#"<!-- <div data-hashlink="hcs://12/0.0.1"></div> -->"#,
            r#"<p data-hashlink="hcs://12/0.0.2"></p>"#,
            r#"<!-- unclosed <div data-hashlink="hcs://12/0.0.3"></div>"#,
        );
        let report = scan(body);
        assert!(report.errors.is_empty());
        assert_eq!(report.references.len(), 1);
        assert_eq!(report.references[0].reference(), "0.0.2");
    }

    #[test]
    fn malformed_override_json_is_tolerated() {
        let body = r#"<div data-hashlink="hcs://12/0.0.1" data-attributes="{not json" data-actions="[1]"></div>"#;
        let report = scan(body);
        assert!(report.errors.is_empty());
        let r = &report.references[0];
        assert!(r.inline_attributes.is_none());
        assert!(r.inline_actions.is_none());
    }

    #[test]
    fn bad_uri_is_reported_per_occurrence() {
        let body = concat!(
            r#"<div data-hashlink="hcs://abc/0.0.1"></div>"#,
            r#"<div data-hashlink="hcs://2/only-registry"></div>"#,
            r#"<div data-hashlink="hcs://12/0.0.2"></div>"#,
        );
        let report = scan(body);
        assert_eq!(report.errors.len(), 2);
        assert!(matches!(report.errors[0].error, TypeError::InvalidProtocol { .. }));
        assert!(matches!(
            report.errors[1].error,
            TypeError::InvalidRegistryReference(_)
        ));
        assert_eq!(report.references.len(), 1);
        assert_eq!(report.references[0].reference(), "0.0.2");
    }

    #[test]
    fn same_target_twice_is_not_deduplicated() {
        let body = r#"<div data-hashlink="hcs://12/0.0.5"></div><div data-hashlink="hcs://12/0.0.5" data-attributes='{"x":1}'></div>"#;
        let report = scan(body);
        assert_eq!(report.references.len(), 2);
        assert!(report.references[0].inline_attributes.is_none());
        assert!(report.references[1].inline_attributes.is_some());
    }

    #[test]
    fn nested_same_name_elements_extend_the_span() {
        let body = r#"<div data-hashlink="hcs://12/0.0.1"><div>inner</div><divider></divider></div>tail"#;
        let r = &scan(body).references[0];
        assert_eq!(&body[r.span.end..], "tail");
    }

    #[test]
    fn unmarked_elements_and_text_are_ignored() {
        let report = scan("<p>a < b</p><img src=x><br/>");
        assert!(report.is_empty());
    }

    #[test]
    fn custom_marker() {
        let scanner = HashLinkScanner::new("data-ref");
        let report = scanner.scan(r#"<i data-ref="hcs://1/0.0.3"></i>"#);
        assert_eq!(report.references[0].protocol(), Protocol::RawContent);
        assert_eq!(scanner.marker(), "data-ref");
    }

    #[test]
    fn splice_replaces_spans_in_order() {
        let body = "a[x]b[y]c";
        let out = splice(
            body,
            &[
                (SourceSpan::new(1, 4), "X".into()),
                (SourceSpan::new(5, 8), "Y".into()),
            ],
        );
        assert_eq!(out, "aXbYc");
    }

    proptest! {
        #[test]
        fn block_uris_scan_to_one_reference(id in "[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,6}") {
            let body = format!(r#"<div data-hashlink="hcs://12/{id}"></div>"#);
            let report = scan(&body);
            prop_assert_eq!(report.references.len(), 1);
            prop_assert_eq!(report.references[0].protocol_id(), "12");
            prop_assert_eq!(report.references[0].reference(), id.as_str());
        }

        #[test]
        fn registry_uris_recover_both_parts(reg in "0\\.0\\.[0-9]{1,5}", entry in "[a-z][a-z0-9-]{0,10}") {
            let body = format!(r#"<div data-hashlink="hcs://2/{reg}/{entry}"></div>"#);
            let report = scan(&body);
            prop_assert_eq!(report.references[0].registry_id(), Some(reg.as_str()));
            prop_assert_eq!(report.references[0].entry_name(), Some(entry.as_str()));
        }
    }
}
