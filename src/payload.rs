// src/payload.rs
//! Wire shape of the cached/served feed: `[{"debug": <version>}, ...entries]`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ingest::types::NormalizedNewsItem;
use crate::relevance::RelevanceEngine;

pub const CACHE_KEY: &str = "latest_news";

pub fn cache_version() -> String {
    format!("tsla-newsfeed v{}-cache", env!("CARGO_PKG_VERSION"))
}

pub fn scheduled_version() -> String {
    format!("tsla-newsfeed v{}-scheduled", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugMarker {
    pub debug: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    pub title: String,
    pub description: String,
    pub image: Option<String>,
    pub og_title: String,
    pub og_description: String,
    pub og_image: Option<String>,
    pub og_site_name: String,
    pub article_published_time: String,
    pub twitter_title: String,
    pub twitter_description: String,
    pub twitter_image: Option<String>,
    pub author: Option<String>,
    pub keywords: Option<String>,
    pub html_title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub pub_date: String,
    pub description: String,
    pub source: String,
    pub image_url: Option<String>,
    pub meta_title: String,
    pub meta_description: String,
    pub meta_image: Option<String>,
    #[serde(rename = "isYouTube")]
    pub is_youtube: bool,
    pub topics: Vec<String>,
    pub metadata: EntryMetadata,
}

impl From<&NormalizedNewsItem> for FeedEntry {
    fn from(it: &NormalizedNewsItem) -> Self {
        let published = it
            .parsed_date
            .map(|d| d.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
            .unwrap_or_else(|| it.pub_date.clone());
        Self {
            title: it.title.clone(),
            link: it.link.clone(),
            pub_date: it.pub_date.clone(),
            description: it.description.clone(),
            source: it.source.clone(),
            image_url: it.image_url.clone(),
            meta_title: it.title.clone(),
            meta_description: it.description.clone(),
            meta_image: it.image_url.clone(),
            is_youtube: it.is_youtube,
            topics: it.topics.clone(),
            metadata: EntryMetadata {
                title: it.title.clone(),
                description: it.description.clone(),
                image: it.image_url.clone(),
                og_title: it.title.clone(),
                og_description: it.description.clone(),
                og_image: it.image_url.clone(),
                og_site_name: it.source.clone(),
                article_published_time: published,
                twitter_title: it.title.clone(),
                twitter_description: it.description.clone(),
                twitter_image: it.image_url.clone(),
                author: it.author.clone(),
                keywords: None,
                html_title: it.title.clone(),
            },
        }
    }
}

/// Debug marker first, then one entry per item in order.
pub fn encode_payload(version: &str, items: &[NormalizedNewsItem]) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(items.len() + 1);
    out.push(serde_json::to_value(DebugMarker {
        debug: version.to_string(),
    })?);
    for it in items {
        out.push(serde_json::to_value(FeedEntry::from(it))?);
    }
    serde_json::to_vec(&out)
}

/// A cached value is usable only if it is a JSON array.
pub fn decode_payload(bytes: &[u8]) -> Option<Vec<Value>> {
    serde_json::from_slice::<Vec<Value>>(bytes).ok()
}

/// Topic-filtered view of a decoded payload; the debug marker stays first.
pub fn filter_payload_by_topics(
    values: Vec<Value>,
    engine: &RelevanceEngine,
    active: &[String],
) -> Vec<Value> {
    values
        .into_iter()
        .filter(|v| {
            if v.get("debug").is_some() {
                return true;
            }
            let topics: Vec<String> = v
                .get("topics")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(|t| t.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            engine.matches_topics(&topics, active)
        })
        .collect()
}
