// src/ingest/decode.rs
//! Entity decoding and markup stripping for raw feed text.
//!
//! Everything here is total: malformed input yields a best-effort string.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_BR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").expect("br regex"));
static RE_P_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<p(\s[^>]*)?>").expect("p regex"));
static RE_P_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</p\s*>").expect("/p regex"));
static RE_LI_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<li(\s[^>]*)?>").expect("li regex"));
static RE_LI_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</li\s*>").expect("/li regex"));
static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").expect("tag regex"));
static RE_CDATA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("cdata regex"));
static RE_BLANK_RUNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t\r]*(\n[ \t\r]*)+").expect("blank-run regex"));
static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{a0}]+").expect("space regex"));

/// Decode named, decimal and hex entities. Unknown entities are left as-is.
pub fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    html_escape::decode_html_entities(s).into_owned()
}

/// Replace `<![CDATA[...]]>` sections with their content.
pub fn unwrap_cdata(s: &str) -> String {
    if !s.contains("<![CDATA[") {
        return s.to_string();
    }
    RE_CDATA.replace_all(s, "$1").into_owned()
}

/// Remove tags, turning block-level ones into line breaks first.
pub fn strip_tags(s: &str) -> String {
    let out = RE_BR.replace_all(s, "\n");
    let out = RE_P_OPEN.replace_all(&out, "\n");
    let out = RE_P_CLOSE.replace_all(&out, "\n\n");
    let out = RE_LI_OPEN.replace_all(&out, "\n* ");
    let out = RE_LI_CLOSE.replace_all(&out, "\n");
    RE_TAGS.replace_all(&out, "").into_owned()
}

/// Feed markup in, readable plain text out.
pub fn to_plain_text(s: &str) -> String {
    let text = strip_tags(&unwrap_cdata(s));
    let text = decode_entities(&text);
    let text = RE_SPACES.replace_all(&text, " ");
    let text = RE_BLANK_RUNS.replace_all(&text, "\n\n");
    text.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Single-line variant for titles, labels and authors.
pub fn to_plain_line(s: &str) -> String {
    to_plain_text(s)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_named_decimal_and_hex() {
        assert_eq!(
            decode_entities("AT&amp;T &#8217;s &#x2014; &quot;ok&quot;"),
            "AT&T \u{2019}s \u{2014} \"ok\""
        );
    }

    #[test]
    fn unknown_entity_survives() {
        assert_eq!(decode_entities("a &bogus; b"), "a &bogus; b");
    }

    #[test]
    fn block_tags_become_line_breaks() {
        let html = "<p>First</p><p>Second<br/>line</p><ul><li>one</li><li>two</li></ul>";
        assert_eq!(to_plain_text(html), "First\n\nSecond\nline\n\n* one\n\n* two");
    }

    #[test]
    fn cdata_and_entities_inside_markup() {
        let raw = "<![CDATA[<b>Tesla&nbsp;Q3</b> deliveries &amp; more]]>";
        assert_eq!(to_plain_text(raw), "Tesla Q3 deliveries & more");
    }

    #[test]
    fn unterminated_tag_does_not_panic() {
        let out = to_plain_text("Model Y <a href=\"x\" price cut");
        assert!(out.starts_with("Model Y"));
    }

    #[test]
    fn plain_line_collapses_newlines() {
        assert_eq!(to_plain_line("<p>Tesla</p>\n<p>news</p>"), "Tesla news");
    }
}
