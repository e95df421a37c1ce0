// src/ingest/dedup.rs
//! Deduplication, the recency window, ordering and the media cap.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use url::Url;

use crate::ingest::rules::{ProviderRules, RuleAction};
use crate::ingest::types::NormalizedNewsItem;
use crate::relevance::RelevanceEngine;

/// Lowercased link minus one trailing slash, or `:title:source` when the link
/// is empty.
pub fn dedup_key(item: &NormalizedNewsItem) -> String {
    if !item.link.is_empty() {
        let link = item.link.strip_suffix('/').unwrap_or(&item.link);
        if !link.is_empty() {
            return link.to_lowercase();
        }
    }
    format!(
        ":{}:{}",
        item.title.trim().to_lowercase(),
        item.source.trim().to_lowercase()
    )
}

/// First occurrence per key wins; order is preserved.
pub fn dedup(items: Vec<NormalizedNewsItem>) -> Vec<NormalizedNewsItem> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|it| seen.insert(dedup_key(it)))
        .collect()
}

/// Keep dated items younger than `window`. Undated items never survive.
pub fn within_window(
    items: Vec<NormalizedNewsItem>,
    now: DateTime<Utc>,
    window: Duration,
) -> Vec<NormalizedNewsItem> {
    items
        .into_iter()
        .filter(|it| it.parsed_date.is_some_and(|d| now - d < window))
        .collect()
}

/// Stable, newest first; undated items sink to the end.
pub fn sort_newest_first(items: &mut [NormalizedNewsItem]) {
    items.sort_by(|a, b| b.parsed_date.cmp(&a.parsed_date));
}

pub fn is_youtube_link(link: &str) -> bool {
    let Ok(u) = Url::parse(link) else {
        return false;
    };
    let host = u.host_str().unwrap_or_default().to_ascii_lowercase();
    host.contains("youtube.com") || host.contains("youtu.be") || host.contains("youtube-nocookie.com")
}

/// Video item: YouTube link, or it came from a feed carrying the `media` rule.
pub fn is_media(item: &NormalizedNewsItem, rules: &ProviderRules) -> bool {
    if Url::parse(&item.link).is_err() {
        return false;
    }
    is_youtube_link(&item.link)
        || rules.applies(RuleAction::Media, &item.origin_feed_url, Some(&item.source))
}

#[derive(Debug, Clone, Copy)]
pub struct RankLimits {
    pub window: Duration,
    pub max_items: usize,
    pub max_media_items: usize,
}

/// Window, sort and truncate; then give media items their own relevance pass
/// and cap before merging everything back.
pub fn rank_and_cap(
    items: Vec<NormalizedNewsItem>,
    now: DateTime<Utc>,
    limits: RankLimits,
    rules: &ProviderRules,
    relevance: &RelevanceEngine,
) -> Vec<NormalizedNewsItem> {
    let mut items = within_window(items, now, limits.window);
    sort_newest_first(&mut items);
    items.truncate(limits.max_items);

    let (media, mut merged): (Vec<_>, Vec<_>) =
        items.into_iter().partition(|it| is_media(it, rules));

    let media_total = media.len();
    let media: Vec<_> = media
        .into_iter()
        .filter(|it| relevance.accepts_media(it))
        .take(limits.max_media_items)
        .map(|mut it| {
            it.is_youtube = true;
            it
        })
        .collect();
    tracing::debug!(target: "ingest", media_total, media_kept = media.len(), "media pass");

    merged.extend(media);
    sort_newest_first(&mut merged);
    let mut merged = within_window(merged, now, limits.window);
    merged.truncate(limits.max_items);
    merged
}
