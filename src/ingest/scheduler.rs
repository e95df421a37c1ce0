// src/ingest/scheduler.rs
use metrics::counter;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::ingest::{refresh_cache, PipelineContext, RefreshSummary};
use crate::payload::scheduled_version;

pub const SCHEDULED_CONTEXT: &str = "Scheduled News Refresh";

#[derive(Clone, Copy, Debug)]
pub struct RefreshSchedulerCfg {
    pub interval: Duration,
}

/// One authoritative refresh with the scheduled version marker.
pub async fn run_scheduled_refresh(ctx: &PipelineContext) -> RefreshSummary {
    let summary = refresh_cache(ctx, &scheduled_version(), SCHEDULED_CONTEXT).await;
    counter!("ingest_runs_total").increment(1);
    if summary.success {
        tracing::info!(
            target: "scheduler",
            items = summary.items_count.unwrap_or_default(),
            sources = summary.sources,
            "scheduled refresh stored"
        );
    } else {
        tracing::error!(
            target: "scheduler",
            error = summary.error.as_deref().unwrap_or("unknown"),
            sources = summary.sources,
            "scheduled refresh failed"
        );
    }
    summary
}

/// Refresh now, then every `interval`. Each tick runs in its own task so a
/// panicking run is logged and the loop keeps going.
pub fn spawn_refresh_scheduler(ctx: PipelineContext, cfg: RefreshSchedulerCfg) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cfg.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let tick_ctx = ctx.clone();
            let run = tokio::spawn(async move { run_scheduled_refresh(&tick_ctx).await });
            if let Err(e) = run.await {
                tracing::error!(target: "scheduler", error = %e, "scheduled refresh task aborted");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, MemoryStore};
    use crate::config::PipelineSettings;
    use crate::ingest::fetch::StaticFetcher;
    use crate::ingest::rules::ProviderRules;
    use crate::ingest::types::FeedSource;
    use crate::ingest::NO_ITEMS_ERROR;
    use crate::journal::recent_failures;
    use crate::payload::{decode_payload, CACHE_KEY};
    use crate::relevance::{RelevanceEngine, RelevanceHandle};
    use std::sync::Arc;

    fn ctx(store: Arc<MemoryStore>) -> PipelineContext {
        PipelineContext {
            feeds: Arc::new(vec![FeedSource::new("https://down.test/rss")]),
            rules: Arc::new(ProviderRules::default()),
            relevance: RelevanceHandle::new(RelevanceEngine::embedded().unwrap()),
            settings: Arc::new(PipelineSettings {
                batch_delay_ms: 0,
                ..PipelineSettings::default()
            }),
            fetcher: Arc::new(StaticFetcher::new()),
            store,
        }
    }

    #[tokio::test]
    async fn zero_items_is_a_logged_failure_not_a_panic() {
        let store = Arc::new(MemoryStore::new());
        let summary = run_scheduled_refresh(&ctx(store.clone())).await;

        assert!(!summary.success);
        assert_eq!(summary.error.as_deref(), Some(NO_ITEMS_ERROR));
        assert_eq!(summary.sources, 1);

        let failures = recent_failures(store.as_ref(), 10).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].context, SCHEDULED_CONTEXT);

        let cached = store.get(CACHE_KEY).await.unwrap().expect("written");
        let values = decode_payload(&cached).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["debug"], scheduled_version());
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_ticks_immediately() {
        let store = Arc::new(MemoryStore::new());
        let handle = spawn_refresh_scheduler(
            ctx(store.clone()),
            RefreshSchedulerCfg {
                interval: Duration::from_secs(300),
            },
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.get(CACHE_KEY).await.unwrap().is_some());
        handle.abort();
    }
}
