// src/ingest/rules.rs
//! Provider rules: a small `{matcher, action}` table consulted by the parser
//! and the pipeline, so provider quirks live in config instead of code.

use anyhow::Context;
use regex::Regex;
use serde::Deserialize;

use crate::ingest::types::FeedSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Feed links are redirects; decode the destination or skip the item.
    ResolveRedirect,
    /// Images from this provider are known-broken.
    SuppressImage,
    /// Drop the item entirely (source-level exclusion).
    DropItem,
    /// Remove a trailing " - <source>" from headlines.
    StripTitleSource,
    /// Items are video/media posts, capped separately.
    Media,
    /// The feed's own query already scopes the topic; relaxed acceptance.
    Authoritative,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderRuleCfg {
    pub id: String,
    /// Regex matched against the origin feed URL.
    #[serde(default)]
    pub feed: Option<String>,
    /// Regex matched against the item's source label.
    #[serde(default)]
    pub source: Option<String>,
    pub action: RuleAction,
}

#[derive(Debug)]
struct CompiledRule {
    id: String,
    feed: Option<Regex>,
    source: Option<Regex>,
    action: RuleAction,
}

impl CompiledRule {
    fn matches(&self, feed_url: &str, source: Option<&str>) -> bool {
        if self.feed.is_none() && self.source.is_none() {
            return false;
        }
        let feed_ok = self.feed.as_ref().map_or(true, |re| re.is_match(feed_url));
        let source_ok = match (&self.source, source) {
            (None, _) => true,
            (Some(re), Some(s)) => re.is_match(s),
            (Some(_), None) => false,
        };
        feed_ok && source_ok
    }
}

#[derive(Debug, Default)]
pub struct ProviderRules {
    rules: Vec<CompiledRule>,
}

impl ProviderRules {
    pub fn compile(cfgs: &[ProviderRuleCfg]) -> anyhow::Result<Self> {
        let compile = |id: &str, what: &str, pat: &Option<String>| -> anyhow::Result<Option<Regex>> {
            pat.as_deref()
                .map(|p| Regex::new(p).with_context(|| format!("rule `{id}` {what} regex")))
                .transpose()
        };
        let rules = cfgs
            .iter()
            .map(|c| {
                Ok(CompiledRule {
                    id: c.id.clone(),
                    feed: compile(&c.id, "feed", &c.feed)?,
                    source: compile(&c.id, "source", &c.source)?,
                    action: c.action,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Add exact-URL rules for feeds whose `provider` hint implies an action.
    /// Unknown hints (`official`, `community`) are labels only.
    pub fn with_feed_hints(mut self, feeds: &[FeedSource]) -> anyhow::Result<Self> {
        for feed in feeds {
            let Some(hint) = feed.provider_hint.as_deref() else {
                continue;
            };
            let actions: &[RuleAction] = match hint.to_ascii_lowercase().as_str() {
                "youtube" | "media" => &[RuleAction::Media],
                "google_news" => &[RuleAction::ResolveRedirect, RuleAction::StripTitleSource],
                "authoritative" => &[RuleAction::Authoritative],
                _ => &[],
            };
            for &action in actions {
                let pattern = format!("^{}$", regex::escape(&feed.url));
                self.rules.push(CompiledRule {
                    id: format!("hint:{hint}"),
                    feed: Some(Regex::new(&pattern).with_context(|| format!("hint for {}", feed.url))?),
                    source: None,
                    action,
                });
            }
        }
        Ok(self)
    }

    /// Does any rule with `action` match this feed (and source, if given)?
    pub fn applies(&self, action: RuleAction, feed_url: &str, source: Option<&str>) -> bool {
        self.matching(action, feed_url, source).is_some()
    }

    /// Id of the first matching rule, for logging.
    pub fn matching(&self, action: RuleAction, feed_url: &str, source: Option<&str>) -> Option<&str> {
        self.rules
            .iter()
            .filter(|r| r.action == action)
            .find(|r| r.matches(feed_url, source))
            .map(|r| r.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> ProviderRules {
        #[derive(Deserialize)]
        struct Doc {
            rules: Vec<ProviderRuleCfg>,
        }
        let doc: Doc = toml::from_str(
            r#"
[[rules]]
id = "gn"
feed = "(?i)news\\.google\\."
action = "resolve_redirect"

[[rules]]
id = "electrek"
source = "(?i)electrek\\.co"
action = "drop_item"
"#,
        )
        .expect("rules toml");
        ProviderRules::compile(&doc.rules).expect("compile")
    }

    #[test]
    fn feed_matcher() {
        let r = rules();
        assert!(r.applies(
            RuleAction::ResolveRedirect,
            "https://news.google.com/rss/search?q=tesla",
            None
        ));
        assert!(!r.applies(RuleAction::ResolveRedirect, "https://cleantechnica.com/feed/", None));
        assert!(!r.applies(RuleAction::SuppressImage, "https://news.google.com/rss", None));
    }

    #[test]
    fn source_matcher_needs_a_source() {
        let r = rules();
        assert_eq!(
            r.matching(RuleAction::DropItem, "https://x.test/feed", Some("electrek.co")),
            Some("electrek")
        );
        assert!(!r.applies(RuleAction::DropItem, "https://electrek.co/feed", None));
    }

    #[test]
    fn youtube_hint_marks_only_that_feed_as_media() {
        let feeds = [
            FeedSource::with_hint("https://www.youtube.com/feeds/videos.xml?channel_id=UC1", "youtube"),
            FeedSource::with_hint("https://www.tesla.com/blog/rss", "official"),
        ];
        let r = rules().with_feed_hints(&feeds).expect("hints");
        assert_eq!(
            r.matching(
                RuleAction::Media,
                "https://www.youtube.com/feeds/videos.xml?channel_id=UC1",
                Some("YouTube")
            ),
            Some("hint:youtube")
        );
        assert!(!r.applies(
            RuleAction::Media,
            "https://www.youtube.com/feeds/videos.xml?channel_id=UC2",
            None
        ));
        assert!(!r.applies(RuleAction::Media, "https://www.tesla.com/blog/rss", None));
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn bad_regex_is_reported_with_rule_id() {
        let cfg = ProviderRuleCfg {
            id: "broken".into(),
            feed: Some("(".into()),
            source: None,
            action: RuleAction::Media,
        };
        let err = ProviderRules::compile(&[cfg]).unwrap_err();
        assert!(format!("{err:#}").contains("broken"));
    }
}
