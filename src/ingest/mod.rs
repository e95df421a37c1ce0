// src/ingest/mod.rs
pub mod decode;
pub mod dedup;
pub mod fetch;
pub mod links;
pub mod parser;
pub mod rules;
pub mod scheduler;
pub mod types;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::Arc;

use crate::cache::{put_logged, CacheStore};
use crate::config::PipelineSettings;
use crate::ingest::dedup::{dedup, is_youtube_link, rank_and_cap, RankLimits};
use crate::ingest::rules::{ProviderRules, RuleAction};
use crate::ingest::types::{FeedFetcher, FeedSource, NormalizedNewsItem, RawFeedItem};
use crate::journal::record_failure;
use crate::payload::{encode_payload, CACHE_KEY};
use crate::relevance::{RelevanceEngine, RelevanceHandle};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_feeds_failed_total", "Feeds that failed to fetch.");
        describe_counter!(
            "ingest_items_parsed_total",
            "Items extracted from feed bodies."
        );
        describe_counter!(
            "ingest_items_skipped_total",
            "Items dropped by the parser (missing title/link, unresolved redirect)."
        );
        describe_gauge!("ingest_items_kept", "Items in the last pipeline result.");
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when ingest pipeline last ran."
        );
        describe_histogram!("ingest_fetch_ms", "Feed fetch time in milliseconds.");
        describe_counter!("cache_hits_total", "Feed requests served from cache.");
        describe_counter!("cache_misses_total", "Feed requests that ran the pipeline.");
        describe_counter!("ingest_runs_total", "Scheduled refresh runs.");
        describe_counter!(
            "ingest_refresh_failed_total",
            "Authoritative refreshes that produced no items."
        );
    });
}

/// Everything one pipeline run needs. Cheap to clone.
#[derive(Clone)]
pub struct PipelineContext {
    pub feeds: Arc<Vec<FeedSource>>,
    pub rules: Arc<ProviderRules>,
    pub relevance: RelevanceHandle,
    pub settings: Arc<PipelineSettings>,
    pub fetcher: Arc<dyn FeedFetcher>,
    pub store: Arc<dyn CacheStore>,
}

/// Parse a feed date. RFC 2822 and RFC 3339 first, then a few common
/// offset-less shapes read as UTC.
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(d) = DateTime::parse_from_rfc2822(s) {
        return Some(d.with_timezone(&Utc));
    }
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z", "%a, %d %b %Y %H:%M %z"] {
        if let Ok(d) = DateTime::parse_from_str(s, fmt) {
            return Some(d.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(d) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(d.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}

/// Raw item → normalized item. Future-dated items lose their date.
pub fn normalize(raw: RawFeedItem, now: DateTime<Utc>, relevance: &RelevanceEngine) -> NormalizedNewsItem {
    let parsed = parse_pub_date(&raw.pub_date_raw);
    let parsed_date = match parsed {
        Some(d) if d < now => Some(d),
        Some(d) => {
            tracing::debug!(target: "ingest", title = %raw.title, date = %d, "future pubDate ignored");
            None
        }
        None => {
            if !raw.pub_date_raw.is_empty() {
                tracing::debug!(target: "ingest", title = %raw.title, raw = %raw.pub_date_raw, "unparseable pubDate");
            }
            None
        }
    };
    let pub_date = parsed_date
        .map(|d| d.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| raw.pub_date_raw.clone());
    let topics = relevance.classify(&raw.title, &raw.description).topics;

    NormalizedNewsItem {
        is_youtube: is_youtube_link(&raw.link),
        title: raw.title,
        link: raw.link,
        pub_date,
        parsed_date,
        description: raw.description,
        source: raw.source_label,
        image_url: raw.image_url,
        topics,
        author: raw.author,
        origin_feed_url: raw.origin_feed_url,
    }
}

/// Output of one run plus the counts callers report on.
#[derive(Debug, Clone, Default)]
pub struct PipelineRun {
    pub items: Vec<NormalizedNewsItem>,
    pub feeds_total: usize,
    pub feeds_failed: usize,
    pub parsed: usize,
    pub skipped: usize,
    pub accepted: usize,
}

pub async fn run_pipeline(ctx: &PipelineContext) -> PipelineRun {
    run_pipeline_at(ctx, Utc::now()).await
}

/// fetch → parse → normalize → dedup → drop rules → acceptance → rank/cap.
pub async fn run_pipeline_at(ctx: &PipelineContext, now: DateTime<Utc>) -> PipelineRun {
    ensure_metrics_described();
    let settings = &ctx.settings;

    let report = fetch::fetch_all(
        &ctx.feeds,
        Arc::clone(&ctx.fetcher),
        Arc::clone(&ctx.rules),
        settings.batch_size,
        settings.batch_delay(),
    )
    .await;
    let parsed = report.items.len();

    let engine = ctx.relevance.current();
    let normalized: Vec<NormalizedNewsItem> = report
        .items
        .into_iter()
        .map(|raw| normalize(raw, now, &engine))
        .collect();

    let unique = dedup(normalized);
    let deduped = unique.len();

    let kept: Vec<NormalizedNewsItem> = unique
        .into_iter()
        .filter(|it| {
            !ctx.rules
                .applies(RuleAction::DropItem, &it.origin_feed_url, Some(&it.source))
        })
        .collect();
    let dropped_by_rule = deduped - kept.len();

    let accepted: Vec<NormalizedNewsItem> = kept
        .into_iter()
        .filter(|it| {
            let authoritative = ctx
                .rules
                .applies(RuleAction::Authoritative, &it.origin_feed_url, None);
            engine.accepts(it, authoritative)
        })
        .collect();
    let accepted_count = accepted.len();

    if accepted_count < settings.low_count_warning {
        tracing::warn!(
            target: "ingest",
            accepted = accepted_count,
            floor = settings.low_count_warning,
            "low relevant item count"
        );
    }

    let limits = RankLimits {
        window: settings.window(),
        max_items: settings.max_items,
        max_media_items: settings.max_media_items,
    };
    let items = rank_and_cap(accepted, now, limits, &ctx.rules, &engine);

    gauge!("ingest_items_kept").set(items.len() as f64);
    gauge!("ingest_pipeline_last_run_ts").set(now.timestamp().max(0) as f64);

    tracing::info!(
        target: "ingest",
        feeds = report.feeds_total,
        feeds_failed = report.feeds_failed,
        parsed,
        skipped = report.skipped,
        deduped,
        dropped_by_rule,
        accepted = accepted_count,
        kept = items.len(),
        "pipeline run"
    );

    PipelineRun {
        items,
        feeds_total: report.feeds_total,
        feeds_failed: report.feeds_failed,
        parsed,
        skipped: report.skipped,
        accepted: accepted_count,
    }
}

/// Response body of an authoritative refresh.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub sources: usize,
    pub timestamp: String,
}

pub const NO_ITEMS_ERROR: &str = "No news items retrieved from RSS feeds";

/// Authoritative run: overwrite the cache without TTL. A run that parsed
/// nothing is still written but reported (and journaled) as a failure.
pub async fn refresh_cache(ctx: &PipelineContext, version: &str, context: &str) -> RefreshSummary {
    let run = run_pipeline(ctx).await;
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

    match encode_payload(version, &run.items) {
        Ok(bytes) => put_logged(ctx.store.as_ref(), CACHE_KEY, bytes, None).await,
        Err(e) => {
            let err = anyhow::Error::new(e).context("encoding feed payload");
            record_failure(ctx.store.as_ref(), context, &err).await;
            return RefreshSummary {
                success: false,
                items_count: None,
                error: Some(format!("{err:#}")),
                sources: run.feeds_total,
                timestamp,
            };
        }
    }

    if run.parsed == 0 {
        let err = anyhow::anyhow!(NO_ITEMS_ERROR);
        record_failure(ctx.store.as_ref(), context, &err).await;
        counter!("ingest_refresh_failed_total").increment(1);
        return RefreshSummary {
            success: false,
            items_count: None,
            error: Some(NO_ITEMS_ERROR.to_string()),
            sources: run.feeds_total,
            timestamp,
        };
    }

    RefreshSummary {
        success: true,
        items_count: Some(run.items.len()),
        error: None,
        sources: run.feeds_total,
        timestamp,
    }
}
