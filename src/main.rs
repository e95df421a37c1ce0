//! TSLA newsfeed: binary entrypoint.
//! Boots the Axum server, the background refresh scheduler and the cache backend.

use shuttle_axum::ShuttleAxum;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tsla_newsfeed::cache::{CacheStore, FileStore, MemoryStore};
use tsla_newsfeed::config::{AppConfig, CacheBackend};
use tsla_newsfeed::ingest::fetch::HttpFeedFetcher;
use tsla_newsfeed::ingest::rules::ProviderRules;
use tsla_newsfeed::ingest::scheduler::{spawn_refresh_scheduler, RefreshSchedulerCfg};
use tsla_newsfeed::relevance::{
    start_hot_reload_thread, RelevanceEngine, RelevanceHandle, DEFAULT_RELEVANCE_CONFIG_PATH,
    ENV_RELEVANCE_CONFIG_PATH,
};
use tsla_newsfeed::telemetry::Metrics;
use tsla_newsfeed::{create_router, AppState, PipelineContext};

/// Compact logs by default, JSON lines with LOG_FORMAT=json.
/// The runtime may already have installed a subscriber; that one wins.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tsla_newsfeed=info,warn"));

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

async fn open_store(backend: &CacheBackend) -> anyhow::Result<Arc<dyn CacheStore>> {
    Ok(match backend {
        CacheBackend::Memory => Arc::new(MemoryStore::new()),
        CacheBackend::File(dir) => Arc::new(FileStore::open(dir.clone()).await?),
    })
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Local .env; no-op in prod.
    let _ = dotenvy::dotenv();

    let cfg = AppConfig::from_env()?;
    init_tracing(cfg.log_json);

    let settings = Arc::new(cfg.feeds.pipeline.clone());
    let rules = Arc::new(
        ProviderRules::compile(&cfg.feeds.rules)?.with_feed_hints(&cfg.feeds.feeds)?,
    );
    let store = open_store(&cfg.cache_backend).await?;
    let fetcher = Arc::new(HttpFeedFetcher::new(
        &settings.user_agent,
        settings.fetch_timeout(),
    )?);

    let engine = RelevanceEngine::from_toml()?;
    let relevance = RelevanceHandle::new(engine);
    let path = std::env::var(ENV_RELEVANCE_CONFIG_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_RELEVANCE_CONFIG_PATH));
    start_hot_reload_thread(relevance.clone(), path);

    let metrics = match Metrics::init(&settings) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = %e, "metrics disabled");
            None
        }
    };

    tracing::info!(
        feeds = cfg.feeds.feeds.len(),
        rules = rules.len(),
        store = store.name(),
        refresh_secs = cfg.refresh_interval.as_secs(),
        admin = cfg.generate_secret.is_some(),
        "tsla-newsfeed starting"
    );

    let pipeline = PipelineContext {
        feeds: Arc::new(cfg.feeds.feeds.clone()),
        rules,
        relevance,
        settings,
        fetcher,
        store,
    };

    // Detached; lives as long as the runtime.
    let _scheduler = spawn_refresh_scheduler(
        pipeline.clone(),
        RefreshSchedulerCfg {
            interval: cfg.refresh_interval,
        },
    );

    let state = AppState {
        pipeline,
        generate_secret: cfg.generate_secret.map(Arc::from),
        metrics,
    };

    Ok(create_router(state).into())
}
