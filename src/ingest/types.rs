// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One configured feed. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSource {
    pub url: String,
    #[serde(default, rename = "provider")]
    pub provider_hint: Option<String>,
}

impl FeedSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            provider_hint: None,
        }
    }

    pub fn with_hint(url: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            provider_hint: Some(hint.into()),
        }
    }
}

/// What the parser pulls out of one `<item>` / `<entry>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFeedItem {
    pub title: String,
    pub link: String,
    pub pub_date_raw: String,
    pub description: String,
    pub image_url: Option<String>,
    pub author: Option<String>,
    pub source_label: String,
    pub origin_feed_url: String,
}

/// The unit the pipeline emits and the cache persists.
///
/// `link` is empty or an absolute http(s) URL; `parsed_date` is `None` or
/// strictly before the run's "now".
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedNewsItem {
    pub title: String,
    pub link: String,
    pub pub_date: String,
    pub parsed_date: Option<DateTime<Utc>>,
    pub description: String,
    pub source: String,
    pub image_url: Option<String>,
    pub is_youtube: bool,
    pub topics: Vec<String>,
    pub author: Option<String>,
    /// Feed the item came from; used by source-aware rules, never serialized.
    pub origin_feed_url: String,
}

/// Why the parser dropped an item. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingTitle,
    MissingLink { title: String },
    UnresolvedRedirect { title: String },
}

/// Per-feed failure. Recovered locally as an empty item list.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("http status {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("no fixture registered for {0}")]
    Unavailable(String),
}

/// Retrieves one feed body. The HTTP client implements this; tests plug in fixtures.
#[async_trait::async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
    fn name(&self) -> &'static str;
}
