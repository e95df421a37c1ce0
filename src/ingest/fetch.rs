// src/ingest/fetch.rs
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::header::ACCEPT;
use tokio::task::JoinHandle;

use crate::ingest::parser::{parse_feed, ParseOutcome};
use crate::ingest::rules::ProviderRules;
use crate::ingest::types::{FeedFetcher, FeedSource, FetchError, RawFeedItem};

const FEED_ACCEPT: &str =
    "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/xml;q=0.9, */*;q=0.8";

/// `reqwest`-backed fetcher with a browser-like User-Agent.
pub struct HttpFeedFetcher {
    client: reqwest::Client,
}

impl HttpFeedFetcher {
    pub fn new(user_agent: &str, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(user_agent);
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let client = builder.build().context("building feed http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let resp = self
            .client
            .get(url)
            .header(ACCEPT, FEED_ACCEPT)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        resp.text().await.map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// In-memory fetcher serving fixed bodies; unknown URLs fail like a 404.
#[derive(Debug, Default, Clone)]
pub struct StaticFetcher {
    bodies: HashMap<String, String>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.bodies.insert(url.into(), body.into());
        self
    }
}

#[async_trait]
impl FeedFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Unavailable(url.to_string()))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Result of one orchestrated fetch over every configured feed.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Concatenated in feed order, document order within a feed.
    pub items: Vec<RawFeedItem>,
    pub feeds_total: usize,
    pub feeds_failed: usize,
    pub skipped: usize,
}

async fn fetch_one(
    fetcher: &dyn FeedFetcher,
    url: &str,
    rules: &ProviderRules,
) -> Result<ParseOutcome, FetchError> {
    let t0 = Instant::now();
    let body = fetcher.fetch(url).await?;
    histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(parse_feed(&body, url, rules))
}

/// Fetch and parse all feeds in sequential batches of concurrent tasks.
///
/// A failing feed (status, transport, task panic) contributes zero items and
/// never aborts the run.
pub async fn fetch_all(
    feeds: &[FeedSource],
    fetcher: Arc<dyn FeedFetcher>,
    rules: Arc<ProviderRules>,
    batch_size: usize,
    batch_delay: Duration,
) -> FetchReport {
    let mut report = FetchReport {
        feeds_total: feeds.len(),
        ..FetchReport::default()
    };

    for (i, batch) in feeds.chunks(batch_size.max(1)).enumerate() {
        if i > 0 && !batch_delay.is_zero() {
            tokio::time::sleep(batch_delay).await;
        }

        let handles: Vec<(String, JoinHandle<Result<ParseOutcome, FetchError>>)> = batch
            .iter()
            .map(|feed| {
                let url = feed.url.clone();
                let fetcher = Arc::clone(&fetcher);
                let rules = Arc::clone(&rules);
                let task = tokio::spawn(async move { fetch_one(&*fetcher, &url, &rules).await });
                (feed.url.clone(), task)
            })
            .collect();

        // Awaited in submission order so output order is deterministic.
        for (url, handle) in handles {
            match handle.await {
                Ok(Ok(mut outcome)) => {
                    counter!("ingest_items_parsed_total").increment(outcome.items.len() as u64);
                    counter!("ingest_items_skipped_total").increment(outcome.skipped.len() as u64);
                    tracing::debug!(
                        target: "ingest",
                        feed = %url,
                        items = outcome.items.len(),
                        skipped = outcome.skipped.len(),
                        "feed parsed"
                    );
                    report.skipped += outcome.skipped.len();
                    report.items.append(&mut outcome.items);
                }
                Ok(Err(e)) => {
                    tracing::warn!(target: "ingest", feed = %url, fetcher = fetcher.name(), error = %e, "feed fetch failed");
                    counter!("ingest_feeds_failed_total").increment(1);
                    report.feeds_failed += 1;
                }
                Err(e) => {
                    tracing::warn!(target: "ingest", feed = %url, error = %e, "feed task aborted");
                    counter!("ingest_feeds_failed_total").increment(1);
                    report.feeds_failed += 1;
                }
            }
        }
    }

    report
}
