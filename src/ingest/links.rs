// src/ingest/links.rs
//! Link cleanup and resolution across RSS/Atom link conventions.

use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use url::Url;

static RE_HTTP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^https?://").expect("http regex"));
static RE_BARE_DOMAIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^https?://[^/]+/?$").expect("bare-domain regex"));
static RE_HAS_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^https?://[^/]+/").expect("has-path regex"));
static RE_CDATA_EDGES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(<!\[CDATA\[|%3C!\[CDATA\[)|(\]\]>|\]\]%3E)$").expect("cdata"));
static RE_ANCHOR_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<a\s[^>]*href=["']([^"']+)["']"#).expect("anchor regex"));

/// An Atom-style `<link>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AtomLink {
    pub href: String,
    pub rel: Option<String>,
    pub mime: Option<String>,
}

/// Every link-ish thing found inside one item.
#[derive(Debug, Clone, Default)]
pub struct LinkCandidates {
    /// Text content of RSS `<link>...</link>`.
    pub text: Option<String>,
    pub atom: Vec<AtomLink>,
    pub guid: Option<String>,
}

pub fn is_http(s: &str) -> bool {
    RE_HTTP.is_match(s)
}

pub fn is_bare_domain(s: &str) -> bool {
    RE_BARE_DOMAIN.is_match(s)
}

fn has_path(s: &str) -> bool {
    RE_HAS_PATH.is_match(s)
}

/// Absolute http(s) URL that `url` can parse.
pub fn is_absolute_http(s: &str) -> bool {
    Url::parse(s)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

/// Strip CDATA wrappers (raw or percent-encoded) and stray brackets; decode a
/// link that arrived fully percent-encoded.
pub fn clean_link(link: &str) -> String {
    let mut out = link.trim().to_string();
    // Wrappers can be nested once inside another encoding layer.
    for _ in 0..2 {
        out = RE_CDATA_EDGES.replace_all(&out, "").into_owned();
    }
    out = out
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim()
        .to_string();
    let lower = out.to_ascii_lowercase();
    if lower.starts_with("http%3a") || lower.starts_with("https%3a") {
        out = percent_decode_str(&out).decode_utf8_lossy().into_owned();
    }
    out.trim().to_string()
}

fn alternate_html(atom: &[AtomLink]) -> Option<&str> {
    atom.iter()
        .find(|l| {
            l.rel.as_deref().is_some_and(|r| r.eq_ignore_ascii_case("alternate"))
                && l.mime
                    .as_deref()
                    .is_some_and(|t| t.eq_ignore_ascii_case("text/html"))
        })
        .map(|l| l.href.as_str())
}

fn general_link(c: &LinkCandidates) -> Option<&str> {
    if let Some(t) = c.text.as_deref().filter(|t| !t.trim().is_empty()) {
        return Some(t);
    }
    if let Some(l) = c
        .atom
        .iter()
        .find(|l| l.rel.as_deref().is_some_and(|r| r.eq_ignore_ascii_case("alternate")))
    {
        return Some(&l.href);
    }
    c.atom.iter().map(|l| l.href.as_str()).find(|h| !h.is_empty())
}

/// Pick the article link for one item.
///
/// Order: Atom alternate HTML link, then an absolute-URL GUID, then the
/// general link (RSS text, Atom alternate, any Atom href); a GUID carrying a
/// path beats a bare-domain link. The result is cleaned.
pub fn resolve_item_link(c: &LinkCandidates) -> String {
    let guid_link = c
        .guid
        .as_deref()
        .map(str::trim)
        .filter(|g| is_http(g))
        .map(str::to_string);

    let mut link = alternate_html(&c.atom)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    if !is_http(&link) {
        if let Some(g) = &guid_link {
            link = g.clone();
        }
    }

    if !is_http(&link) {
        if let Some(general) = general_link(c).map(str::trim) {
            let guid_is_specific = guid_link.as_deref().is_some_and(has_path);
            if !(guid_is_specific && is_bare_domain(general)) {
                link = general.to_string();
            }
        }
    }

    if let Some(g) = guid_link.as_deref().filter(|g| has_path(g)) {
        if link.is_empty() || !is_http(&link) || is_bare_domain(&link) {
            link = g.to_string();
        }
    }

    clean_link(&link)
}

/// First `<a href>` in a chunk of description markup.
pub fn first_anchor_href(markup: &str) -> Option<String> {
    RE_ANCHOR_HREF
        .captures(markup)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// True for Google News article redirects and `google.com/url?` hops.
pub fn is_google_redirect(link: &str) -> bool {
    let Ok(u) = Url::parse(link) else {
        return link.contains("news.google.com/rss/articles/") || link.contains("google.com/url?");
    };
    let host = u.host_str().unwrap_or_default().to_ascii_lowercase();
    if host == "news.google.com" || host.ends_with(".news.google.com") {
        return true;
    }
    (host == "google.com" || host.ends_with(".google.com")) && u.path() == "/url"
}

/// Decode the destination from a `url=` or `q=` query parameter.
pub fn decode_redirect_param(link: &str) -> Option<String> {
    let u = Url::parse(link).ok()?;
    let mut q = None;
    for (k, v) in u.query_pairs() {
        match k.as_ref() {
            "url" => return Some(clean_link(&v)),
            "q" if q.is_none() => q = Some(clean_link(&v)),
            _ => {}
        }
    }
    q
}

/// Resolve a Google News item to its destination, or `None` when only the
/// redirect is known.
///
/// The description's first anchor is tried first, then the feed link itself.
pub fn resolve_google_news_link(link: &str, description_markup: &str) -> Option<String> {
    let anchor = first_anchor_href(description_markup)
        .map(|h| clean_link(&crate::ingest::decode::decode_entities(&h)));
    anchor
        .as_deref()
        .and_then(destination_of)
        .or_else(|| destination_of(link))
}

fn destination_of(candidate: &str) -> Option<String> {
    let resolved = if is_google_redirect(candidate) {
        decode_redirect_param(candidate)
            .filter(|d| is_http(d))
            .unwrap_or_else(|| candidate.to_string())
    } else {
        candidate.to_string()
    };
    (is_absolute_http(&resolved) && !is_google_redirect(&resolved)).then_some(resolved)
}

/// Hostname without a leading `www.`.
pub fn display_host(url: &str) -> Option<String> {
    let u = Url::parse(url).ok()?;
    let host = u.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(href: &str, rel: Option<&str>, mime: Option<&str>) -> AtomLink {
        AtomLink {
            href: href.into(),
            rel: rel.map(Into::into),
            mime: mime.map(Into::into),
        }
    }

    #[test]
    fn atom_alternate_html_wins() {
        let c = LinkCandidates {
            text: Some("https://example.com/rss-text".into()),
            atom: vec![
                atom("https://example.com/self", Some("self"), None),
                atom("https://example.com/post", Some("alternate"), Some("text/html")),
            ],
            guid: Some("https://example.com/guid".into()),
        };
        assert_eq!(resolve_item_link(&c), "https://example.com/post");
    }

    #[test]
    fn url_guid_beats_general_link() {
        let c = LinkCandidates {
            text: Some("https://example.com/from-link".into()),
            atom: vec![],
            guid: Some("https://example.com/from-guid".into()),
        };
        assert_eq!(resolve_item_link(&c), "https://example.com/from-guid");
    }

    #[test]
    fn non_url_guid_falls_back_to_rss_link() {
        let c = LinkCandidates {
            text: Some("https://example.com/a".into()),
            atom: vec![],
            guid: Some("tag:example.com,2024:123".into()),
        };
        assert_eq!(resolve_item_link(&c), "https://example.com/a");
    }

    #[test]
    fn guid_with_path_beats_bare_domain() {
        let c = LinkCandidates {
            text: Some("https://example.com/".into()),
            atom: vec![],
            guid: Some("https://example.com/2024/01/story".into()),
        };
        assert_eq!(resolve_item_link(&c), "https://example.com/2024/01/story");
    }

    #[test]
    fn cdata_wrapped_link_is_cleaned() {
        assert_eq!(
            clean_link("<![CDATA[https://example.com/x]]>"),
            "https://example.com/x"
        );
        assert_eq!(
            clean_link("%3C![CDATA[https://example.com/y]]%3E"),
            "https://example.com/y"
        );
        assert_eq!(
            clean_link("https%3A%2F%2Fexample.com%2Fz"),
            "https://example.com/z"
        );
    }

    #[test]
    fn google_redirect_param_is_decoded() {
        let link = "https://www.google.com/url?rct=j&url=https%3A%2F%2Fwww.reuters.com%2Ftesla&ct=ga";
        assert!(is_google_redirect(link));
        assert_eq!(
            resolve_google_news_link(link, "").as_deref(),
            Some("https://www.reuters.com/tesla")
        );
    }

    #[test]
    fn google_anchor_in_description_is_used() {
        let desc = r#"<a href="https://electrive.com/tesla-story" target="_blank">Story</a>"#;
        assert_eq!(
            resolve_google_news_link("https://news.google.com/rss/articles/CBMi", desc).as_deref(),
            Some("https://electrive.com/tesla-story")
        );
    }

    #[test]
    fn opaque_google_article_is_unresolvable() {
        let desc = r#"<a href="https://news.google.com/rss/articles/CBMiXYZ?oc=5">T</a>"#;
        assert_eq!(
            resolve_google_news_link("https://news.google.com/rss/articles/CBMiXYZ?oc=5", desc),
            None
        );
    }

    #[test]
    fn opaque_anchor_falls_back_to_feed_redirect() {
        let desc = r#"<a href="https://news.google.com/rss/articles/CBMiXYZ?oc=5">T</a>"#;
        let link = "https://www.google.com/url?rct=j&url=https%3A%2F%2Fwww.reuters.com%2Ftesla&ct=ga";
        assert_eq!(
            resolve_google_news_link(link, desc).as_deref(),
            Some("https://www.reuters.com/tesla")
        );
    }

    #[test]
    fn display_host_strips_www() {
        assert_eq!(
            display_host("https://www.teslarati.com/feed/").as_deref(),
            Some("teslarati.com")
        );
        assert_eq!(display_host("not a url"), None);
    }
}
