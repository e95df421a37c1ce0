// tests/pipeline_e2e.rs
//
// Full pipeline over canned feeds: fetch → parse → normalize → dedup →
// acceptance → window/rank, plus the authoritative refresh that writes the cache.

use chrono::{TimeZone, Utc};
use std::sync::Arc;

use tsla_newsfeed::cache::{CacheStore, MemoryStore};
use tsla_newsfeed::config::{FeedsFile, PipelineSettings};
use tsla_newsfeed::ingest::fetch::StaticFetcher;
use tsla_newsfeed::ingest::rules::ProviderRules;
use tsla_newsfeed::ingest::types::FeedSource;
use tsla_newsfeed::ingest::{refresh_cache, run_pipeline_at, PipelineContext, NO_ITEMS_ERROR};
use tsla_newsfeed::journal::recent_failures;
use tsla_newsfeed::payload::{decode_payload, scheduled_version, CACHE_KEY};
use tsla_newsfeed::relevance::{RelevanceEngine, RelevanceHandle};

const RSS_URL: &str = "https://insideevs.com/rss/category/tesla/";
const ATOM_URL: &str = "https://www.reddit.com/r/TeslaMotors/.rss";
const GOOGLE_URL: &str = "https://news.google.com/rss/search?q=tesla&hl=en-US&gl=US&ceid=US:en";
const DOWN_URL: &str = "https://down.test/rss";

fn ctx(feeds: Vec<FeedSource>, fetcher: StaticFetcher, store: Arc<MemoryStore>) -> PipelineContext {
    let shipped = FeedsFile::embedded().expect("embedded feeds.toml");
    let rules = ProviderRules::compile(&shipped.rules)
        .and_then(|r| r.with_feed_hints(&feeds))
        .expect("rules");
    PipelineContext {
        feeds: Arc::new(feeds),
        rules: Arc::new(rules),
        relevance: RelevanceHandle::new(RelevanceEngine::embedded().expect("relevance")),
        settings: Arc::new(PipelineSettings {
            batch_delay_ms: 0,
            ..PipelineSettings::default()
        }),
        fetcher: Arc::new(fetcher),
        store,
    }
}

fn fixture_ctx(store: Arc<MemoryStore>) -> PipelineContext {
    let fetcher = StaticFetcher::new()
        .with_feed(RSS_URL, include_str!("fixtures/rss.xml"))
        .with_feed(ATOM_URL, include_str!("fixtures/atom.xml"))
        .with_feed(GOOGLE_URL, include_str!("fixtures/google_news.xml"));
    ctx(
        vec![
            FeedSource::new(RSS_URL),
            FeedSource::new(DOWN_URL),
            FeedSource::new(ATOM_URL),
            FeedSource::with_hint(GOOGLE_URL, "google_news"),
        ],
        fetcher,
        store,
    )
}

#[tokio::test]
async fn fixtures_produce_ranked_relevant_items() {
    let now = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
    let run = run_pipeline_at(&fixture_ctx(Arc::new(MemoryStore::new())), now).await;

    assert_eq!(run.feeds_total, 4);
    assert_eq!(run.feeds_failed, 1);
    assert_eq!(run.parsed, 10);
    assert_eq!(run.skipped, 2);

    let titles: Vec<&str> = run.items.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(
        titles,
        vec![
            "Tesla shares rise after delivery beat",
            "Analysts revisit TSLA price targets",
            "Tesla Model Y Tops European Sales Charts",
            "Tesla FSD v12 rolls out to employees",
            "Cybertruck Deliveries Ramp In Texas",
        ]
    );

    // Rejected by relevance, outside the window, or future-dated.
    for gone in [
        "Ford Announces New Mustang Trim",
        "Musk comments on the factory tour",
        "Tesla Q3 Earnings Recap",
        "Tesla Semi spotted on the highway",
    ] {
        assert!(!titles.contains(&gone), "{gone} should not be served");
    }

    let reuters = &run.items[0];
    assert_eq!(reuters.pub_date, "2024-01-02T14:00:00.000Z");
    assert_eq!(reuters.topics, vec!["tesla".to_string()]);
    assert!(!reuters.is_youtube);
    assert!(run
        .items
        .iter()
        .all(|i| i.parsed_date.is_some_and(|d| d < now)));
}

#[tokio::test]
async fn empty_body_feed_is_not_an_error() {
    let now = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
    let a = "https://a.test/rss";
    let b = "https://b.test/rss";
    let fetcher = StaticFetcher::new()
        .with_feed(
            a,
            r#"<rss><channel><item>
<title>Tesla unveils new Model Y</title>
<link>https://example.com/a</link>
<pubDate>Mon, 01 Jan 2024 12:00:00 GMT</pubDate>
</item></channel></rss>"#,
        )
        .with_feed(b, "");
    let run = run_pipeline_at(
        &ctx(
            vec![FeedSource::new(a), FeedSource::new(b)],
            fetcher,
            Arc::new(MemoryStore::new()),
        ),
        now,
    )
    .await;

    assert_eq!(run.feeds_failed, 0);
    assert_eq!(run.items.len(), 1);
    assert_eq!(run.items[0].topics, vec!["tesla".to_string()]);
    assert_eq!(run.items[0].link, "https://example.com/a");
    assert_eq!(run.items[0].pub_date, "2024-01-01T12:00:00.000Z");
}

#[tokio::test]
async fn refresh_writes_authoritative_payload() {
    let store = Arc::new(MemoryStore::new());
    let summary = refresh_cache(&fixture_ctx(store.clone()), &scheduled_version(), "test").await;

    // Fixture dates are long past the window at wall-clock time; the refresh
    // still counts as successful because feeds returned items.
    assert!(summary.success);
    assert_eq!(summary.sources, 4);
    assert_eq!(summary.items_count, Some(0));
    assert!(summary.error.is_none());

    let cached = store.get(CACHE_KEY).await.unwrap().expect("cache written");
    let values = decode_payload(&cached).expect("array payload");
    assert_eq!(values[0]["debug"], scheduled_version());
    assert!(recent_failures(store.as_ref(), 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn refresh_with_nothing_parsed_is_reported_and_journaled() {
    let store = Arc::new(MemoryStore::new());
    let c = ctx(vec![FeedSource::new(DOWN_URL)], StaticFetcher::new(), store.clone());
    let summary = refresh_cache(&c, &scheduled_version(), "News Cache Refresh").await;

    assert!(!summary.success);
    assert_eq!(summary.error.as_deref(), Some(NO_ITEMS_ERROR));
    assert!(summary.items_count.is_none());

    let json = serde_json::to_value(&summary).unwrap();
    assert!(json.get("itemsCount").is_none());
    assert_eq!(json["sources"], 1);

    let failures = recent_failures(store.as_ref(), 10).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].context, "News Cache Refresh");
    assert_eq!(failures[0].error.message, NO_ITEMS_ERROR);
}
