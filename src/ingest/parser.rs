// src/ingest/parser.rs
//! Tolerant RSS/Atom item extraction.
//!
//! A streaming `quick-xml` pass collects candidate values for every field of
//! an `<item>` / `<entry>`; the fallback chains (date tags, description tags,
//! link shapes, image sources) are resolved when the element closes. Markup
//! nested inside text fields is re-serialized so that anchors and images in
//! un-escaped XHTML bodies are still visible to the resolvers.
//!
//! Entities are decoded once per layer. Top-level text of bodies, links and
//! `type="html"` fields is XML-unescaped on capture, since it holds escaped
//! HTML or URLs. Everything else stays escaped until the plain-text pass.

use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use url::Url;

use crate::ingest::decode::{decode_entities, to_plain_line, to_plain_text, unwrap_cdata};
use crate::ingest::links::{
    display_host, is_absolute_http, resolve_google_news_link, resolve_item_link, AtomLink,
    LinkCandidates,
};
use crate::ingest::rules::{ProviderRules, RuleAction};
use crate::ingest::types::{RawFeedItem, SkipReason};

static RE_IMG_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<img\s[^>]*src=["']([^"']+)["']"#).expect("img regex"));
static RE_INNER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<name(?:\s[^>]*)?>(.*?)</name>").expect("name regex"));
static RE_INNER_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title(?:\s[^>]*)?>(.*?)</title>").expect("title regex"));

/// Date tags in priority order; the first present one wins.
const DATE_TAGS: [&str; 4] = ["pubdate", "published", "updated", "dc:date"];
/// Body tags in priority order.
const BODY_TAGS: [&str; 4] = ["content:encoded", "content", "description", "summary"];

/// Items in document order plus the ones that had to be dropped.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub items: Vec<RawFeedItem>,
    pub skipped: Vec<SkipReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Guid,
    Date(usize),
    Body(usize),
    Author,
    Source,
}

fn field_for(name: &str) -> Option<Field> {
    if let Some(i) = DATE_TAGS.iter().position(|t| *t == name) {
        return Some(Field::Date(i));
    }
    if let Some(i) = BODY_TAGS.iter().position(|t| *t == name) {
        return Some(Field::Body(i));
    }
    match name {
        "title" => Some(Field::Title),
        "link" => Some(Field::Link),
        "guid" => Some(Field::Guid),
        "dc:creator" | "author" => Some(Field::Author),
        "source" | "news:source" => Some(Field::Source),
        _ => None,
    }
}

fn is_item_tag(name: &str) -> bool {
    name == "item" || name == "entry"
}

/// Raw values seen inside one item. Markup strings are kept un-flattened.
#[derive(Debug, Default)]
struct ItemFields {
    title: Option<String>,
    links: LinkCandidates,
    dates: [Option<String>; 4],
    bodies: [Option<String>; 4],
    creator: Option<String>,
    author: Option<String>,
    source: Option<String>,
    media_content: Option<String>,
    media_thumbnail: Option<String>,
    enclosure_image: Option<String>,
}

impl ItemFields {
    fn store(&mut self, field: Field, tag: &str, value: String) {
        let slot = match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.links.text,
            Field::Guid => &mut self.links.guid,
            Field::Date(i) => &mut self.dates[i],
            Field::Body(i) => &mut self.bodies[i],
            Field::Author if tag == "dc:creator" => &mut self.creator,
            Field::Author => &mut self.author,
            Field::Source => &mut self.source,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    fn first_body(&self) -> String {
        self.bodies
            .iter()
            .flatten()
            .find(|b| !b.trim().is_empty())
            .map(|b| unwrap_cdata(b))
            .unwrap_or_default()
    }

    fn first_date(&self) -> String {
        self.dates
            .iter()
            .flatten()
            .map(|d| to_plain_line(d))
            .find(|d| !d.is_empty())
            .unwrap_or_default()
    }
}

/// Text field currently being collected.
struct Capture {
    field: Field,
    tag: String,
    /// Nesting of same-named elements inside the field.
    depth: usize,
    /// Open child elements of any name; their text is already markup.
    nested: usize,
    /// Top-level text is escaped HTML or a URL and is unescaped on capture.
    /// Other text stays escaped and is decoded once when flattened.
    unescape: bool,
    buf: String,
}

fn unescapes_text(field: Field, e: &BytesStart<'_>) -> bool {
    match field {
        Field::Body(_) | Field::Link | Field::Guid => true,
        _ => {
            let attrs = attributes(e);
            matches!(attr(&attrs, "type"), Some("html" | "text/html"))
        }
    }
}

/// One XML unescape pass. Feeds that leak HTML entities into text are
/// decoded as HTML instead.
fn xml_text(raw: &str) -> String {
    match quick_xml::escape::unescape(raw) {
        Ok(text) => text.into_owned(),
        Err(_) => decode_entities(raw),
    }
}

fn lower_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_lowercase()
}

fn attributes(e: &BytesStart<'_>) -> Vec<(String, String)> {
    e.attributes()
        .with_checks(false)
        .flatten()
        .map(|a| {
            (
                lower_name(a.key.as_ref()),
                xml_text(String::from_utf8_lossy(&a.value).trim()),
            )
        })
        .collect()
}

fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

fn is_image_mime(mime: Option<&str>) -> bool {
    mime.is_some_and(|m| m.to_ascii_lowercase().starts_with("image/"))
}

/// Attribute-carrying elements: Atom links, media and enclosures.
fn record_attributes(fields: &mut ItemFields, name: &str, e: &BytesStart<'_>) {
    match name {
        "link" | "media:content" | "media:thumbnail" | "enclosure" => {}
        _ => return,
    }
    let attrs = attributes(e);
    match name {
        "link" => {
            if let Some(href) = attr(&attrs, "href") {
                fields.links.atom.push(AtomLink {
                    href: href.to_string(),
                    rel: attr(&attrs, "rel").map(str::to_string),
                    mime: attr(&attrs, "type").map(str::to_string),
                });
            }
        }
        "media:content" => {
            let mime = attr(&attrs, "type").map(str::to_ascii_lowercase);
            let non_image = mime
                .as_deref()
                .is_some_and(|m| m.starts_with("video/") || m.starts_with("audio/"));
            if !non_image && fields.media_content.is_none() {
                fields.media_content = attr(&attrs, "url").map(str::to_string);
            }
        }
        "media:thumbnail" => {
            if fields.media_thumbnail.is_none() {
                fields.media_thumbnail = attr(&attrs, "url").map(str::to_string);
            }
        }
        _ => {
            if is_image_mime(attr(&attrs, "type")) && fields.enclosure_image.is_none() {
                fields.enclosure_image = attr(&attrs, "url").map(str::to_string);
            }
        }
    }
}

fn push_start(buf: &mut String, e: &BytesStart<'_>, empty: bool) {
    buf.push('<');
    buf.push_str(&String::from_utf8_lossy(e));
    buf.push_str(if empty { "/>" } else { ">" });
}

/// Parse one feed body. Never fails: unreadable tails are logged and the
/// items recovered so far are returned.
pub fn parse_feed(xml: &str, feed_url: &str, rules: &ProviderRules) -> ParseOutcome {
    let mut reader = Reader::from_str(xml);
    {
        let cfg = reader.config_mut();
        cfg.trim_text(false);
        cfg.check_end_names = false;
    }

    let mut out = ParseOutcome::default();
    let mut item: Option<ItemFields> = None;
    let mut capture: Option<Capture> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = lower_name(e.name().as_ref());
                if item.is_none() {
                    if is_item_tag(&name) {
                        item = Some(ItemFields::default());
                    }
                    continue;
                }
                let Some(fields) = item.as_mut() else {
                    continue;
                };
                if let Some(cap) = capture.as_mut() {
                    if name == cap.tag {
                        cap.depth += 1;
                    }
                    cap.nested += 1;
                    push_start(&mut cap.buf, &e, false);
                    continue;
                }
                record_attributes(fields, &name, &e);
                if let Some(field) = field_for(&name) {
                    capture = Some(Capture {
                        unescape: unescapes_text(field, &e),
                        field,
                        tag: name,
                        depth: 0,
                        nested: 0,
                        buf: String::new(),
                    });
                }
            }
            Ok(Event::Empty(e)) => {
                let Some(fields) = item.as_mut() else {
                    continue;
                };
                if let Some(cap) = capture.as_mut() {
                    push_start(&mut cap.buf, &e, true);
                    continue;
                }
                let name = lower_name(e.name().as_ref());
                record_attributes(fields, &name, &e);
            }
            Ok(Event::Text(t)) => {
                if let Some(cap) = capture.as_mut() {
                    let raw = String::from_utf8_lossy(&t);
                    if cap.unescape && cap.nested == 0 {
                        cap.buf.push_str(&xml_text(&raw));
                    } else {
                        cap.buf.push_str(&raw);
                    }
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(cap) = capture.as_mut() {
                    cap.buf.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::End(e)) => {
                let name = lower_name(e.name().as_ref());
                let Some(fields) = item.as_mut() else {
                    continue;
                };
                if let Some(cap) = capture.as_mut() {
                    if name == cap.tag && cap.depth > 0 {
                        cap.depth -= 1;
                    } else if name == cap.tag || is_item_tag(&name) {
                        if let Some(done) = capture.take() {
                            fields.store(done.field, &done.tag, done.buf);
                        }
                    }
                    if let Some(cap) = capture.as_mut() {
                        cap.nested = cap.nested.saturating_sub(1);
                        cap.buf.push_str("</");
                        cap.buf.push_str(&name);
                        cap.buf.push('>');
                        continue;
                    }
                }
                if is_item_tag(&name) {
                    if let Some(done) = item.take() {
                        match finish_item(done, feed_url, rules) {
                            Ok(raw) => out.items.push(raw),
                            Err(reason) => {
                                tracing::warn!(
                                    target: "ingest",
                                    feed = feed_url,
                                    reason = ?reason,
                                    "parse skip"
                                );
                                out.skipped.push(reason);
                            }
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::warn!(
                    target: "ingest",
                    feed = feed_url,
                    error = %e,
                    position = reader.buffer_position(),
                    recovered = out.items.len(),
                    "xml reader stopped early"
                );
                break;
            }
            Ok(_) => {}
        }
    }

    out
}

fn author_of(fields: &ItemFields) -> Option<String> {
    if let Some(c) = fields.creator.as_deref() {
        let c = to_plain_line(c);
        if !c.is_empty() {
            return Some(c);
        }
    }
    let raw = fields.author.as_deref()?;
    let inner = RE_INNER_NAME
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw);
    Some(to_plain_line(inner)).filter(|a| !a.is_empty())
}

fn source_of(fields: &ItemFields, feed_url: &str) -> String {
    let explicit = fields.source.as_deref().map(|raw| {
        let inner = RE_INNER_TITLE
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or(raw);
        to_plain_line(inner)
    });
    match explicit {
        Some(s) if !s.is_empty() => s,
        _ => display_host(feed_url).unwrap_or_else(|| feed_url.to_string()),
    }
}

fn image_of(fields: &ItemFields, body: &str) -> Option<String> {
    let link_enclosure = fields
        .links
        .atom
        .iter()
        .find(|l| {
            l.rel.as_deref().is_some_and(|r| r.eq_ignore_ascii_case("enclosure"))
                && is_image_mime(l.mime.as_deref())
        })
        .map(|l| l.href.clone());
    fields
        .media_content
        .clone()
        .or_else(|| fields.media_thumbnail.clone())
        .or_else(|| fields.enclosure_image.clone())
        .or(link_enclosure)
        .or_else(|| {
            RE_IMG_SRC
                .captures(body)
                .and_then(|c| c.get(1))
                .map(|m| decode_entities(m.as_str()))
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// "Headline - Publisher" → "Headline" when the suffix is the item's source.
fn strip_source_suffix(title: &str, source: &str) -> String {
    match title.rfind(" - ") {
        Some(idx) if idx > 0 && title[idx + 3..].trim().eq_ignore_ascii_case(source.trim()) => {
            title[..idx].trim_end().to_string()
        }
        _ => title.to_string(),
    }
}

/// Relative item links are resolved against the feed URL.
fn absolutize(link: &str, feed_url: &str) -> String {
    if link.is_empty() || is_absolute_http(link) {
        return link.to_string();
    }
    Url::parse(feed_url)
        .and_then(|base| base.join(link))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| link.to_string())
}

fn finish_item(
    fields: ItemFields,
    feed_url: &str,
    rules: &ProviderRules,
) -> Result<RawFeedItem, SkipReason> {
    let title = fields.title.as_deref().map(to_plain_line).unwrap_or_default();
    if title.is_empty() {
        return Err(SkipReason::MissingTitle);
    }

    let body = fields.first_body();
    let mut link = absolutize(&resolve_item_link(&fields.links), feed_url);

    if rules.applies(RuleAction::ResolveRedirect, feed_url, None) {
        match resolve_google_news_link(&link, &body) {
            Some(dest) => link = dest,
            None => return Err(SkipReason::UnresolvedRedirect { title }),
        }
    }
    if !is_absolute_http(&link) {
        return Err(SkipReason::MissingLink { title });
    }

    let source = source_of(&fields, feed_url);
    let title = if rules.applies(RuleAction::StripTitleSource, feed_url, Some(&source)) {
        strip_source_suffix(&title, &source)
    } else {
        title
    };

    let image_url = if rules.applies(RuleAction::SuppressImage, feed_url, Some(&source)) {
        None
    } else {
        image_of(&fields, &body)
    };

    Ok(RawFeedItem {
        title,
        link,
        pub_date_raw: fields.first_date(),
        description: to_plain_text(&body),
        image_url,
        author: author_of(&fields),
        source_label: source,
        origin_feed_url: feed_url.to_string(),
    })
}
