use anyhow::Context;
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::PipelineSettings;

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and publish the cache lifetimes
    /// as static gauges. Fails if another recorder is already installed.
    pub fn init(settings: &PipelineSettings) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        crate::ingest::ensure_metrics_described();
        gauge!("feed_cache_miss_ttl_secs").set(settings.miss_ttl_secs as f64);
        gauge!("feed_cache_hit_max_age_secs").set(settings.hit_max_age_secs as f64);

        Ok(Self { handle })
    }

    /// Prometheus exposition text.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
