// src/config/mod.rs
//! Runtime configuration: `config/feeds.toml` (feeds, provider rules,
//! pipeline tunables) plus environment variables.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::links::is_absolute_http;
use crate::ingest::rules::ProviderRuleCfg;
use crate::ingest::types::FeedSource;

pub const ENV_FEEDS_CONFIG_PATH: &str = "FEEDS_CONFIG_PATH";
pub const DEFAULT_FEEDS_CONFIG_PATH: &str = "config/feeds.toml";
pub const EMBEDDED_FEEDS_TOML: &str = include_str!("../../config/feeds.toml");

pub const ENV_GENERATE_SECRET: &str = "GENERATE_SECRET";
pub const ENV_CACHE_BACKEND: &str = "CACHE_BACKEND";
pub const ENV_CACHE_DIR: &str = "CACHE_DIR";
pub const ENV_REFRESH_INTERVAL_SECS: &str = "REFRESH_INTERVAL_SECS";
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";

const DEFAULT_CACHE_DIR: &str = "cache";
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 300;

fn default_batch_size() -> usize {
    4
}
fn default_batch_delay_ms() -> u64 {
    200
}
fn default_window_days() -> i64 {
    7
}
fn default_max_items() -> usize {
    250
}
fn default_max_media_items() -> usize {
    7
}
fn default_low_count_warning() -> usize {
    60
}
fn default_miss_ttl_secs() -> u64 {
    360
}
fn default_hit_max_age_secs() -> u64 {
    240
}
fn default_miss_max_age_secs() -> u64 {
    60
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36".to_string()
}

/// `[pipeline]` tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_max_media_items")]
    pub max_media_items: usize,
    #[serde(default = "default_low_count_warning")]
    pub low_count_warning: usize,
    #[serde(default = "default_miss_ttl_secs")]
    pub miss_ttl_secs: u64,
    #[serde(default = "default_hit_max_age_secs")]
    pub hit_max_age_secs: u64,
    #[serde(default = "default_miss_max_age_secs")]
    pub miss_max_age_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Unset means the HTTP client default.
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            window_days: default_window_days(),
            max_items: default_max_items(),
            max_media_items: default_max_media_items(),
            low_count_warning: default_low_count_warning(),
            miss_ttl_secs: default_miss_ttl_secs(),
            hit_max_age_secs: default_hit_max_age_secs(),
            miss_max_age_secs: default_miss_max_age_secs(),
            user_agent: default_user_agent(),
            fetch_timeout_secs: None,
        }
    }
}

impl PipelineSettings {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::days(self.window_days)
    }

    pub fn miss_ttl(&self) -> Duration {
        Duration::from_secs(self.miss_ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }
}

/// Parsed `feeds.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedsFile {
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub feeds: Vec<FeedSource>,
    #[serde(default)]
    pub rules: Vec<ProviderRuleCfg>,
}

impl FeedsFile {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let file: FeedsFile = toml::from_str(s).context("parsing feeds config")?;
        for f in &file.feeds {
            if !is_absolute_http(&f.url) {
                bail!("feed url `{}` is not an absolute http(s) URL", f.url);
            }
        }
        Ok(file)
    }

    pub fn embedded() -> Result<Self> {
        Self::from_toml_str(EMBEDDED_FEEDS_TOML)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading feeds config from {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("in {}", path.display()))
    }

    /// 1) $FEEDS_CONFIG_PATH (must exist)
    /// 2) config/feeds.toml
    /// 3) the embedded copy
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_FEEDS_CONFIG_PATH) {
            return Self::load_from(Path::new(&p));
        }
        let default = PathBuf::from(DEFAULT_FEEDS_CONFIG_PATH);
        if default.exists() {
            return Self::load_from(&default);
        }
        tracing::info!(target: "config", "no feeds config on disk, using embedded default");
        Self::embedded()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    File(PathBuf),
}

/// Everything the binary needs to boot.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub feeds: FeedsFile,
    /// `None` disables the admin refresh endpoint (every call is rejected).
    pub generate_secret: Option<String>,
    pub cache_backend: CacheBackend,
    pub refresh_interval: Duration,
    pub log_json: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let feeds = FeedsFile::load_default()?;

        let generate_secret = std::env::var(ENV_GENERATE_SECRET)
            .ok()
            .filter(|s| !s.trim().is_empty());

        let cache_backend = match std::env::var(ENV_CACHE_BACKEND)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "" | "memory" => CacheBackend::Memory,
            "file" => CacheBackend::File(PathBuf::from(
                std::env::var(ENV_CACHE_DIR).unwrap_or_else(|_| DEFAULT_CACHE_DIR.to_string()),
            )),
            other => bail!("unsupported {ENV_CACHE_BACKEND} `{other}` (expected memory|file)"),
        };

        let refresh_interval = match std::env::var(ENV_REFRESH_INTERVAL_SECS) {
            Ok(v) => {
                let secs: u64 = v
                    .trim()
                    .parse()
                    .with_context(|| format!("{ENV_REFRESH_INTERVAL_SECS}=`{v}`"))?;
                Duration::from_secs(secs.max(1))
            }
            Err(_) => Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
        };

        let log_json = std::env::var(ENV_LOG_FORMAT)
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(Self {
            feeds,
            generate_secret,
            cache_backend,
            refresh_interval,
            log_json,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn embedded_feeds_parse_with_defaults() {
        let f = FeedsFile::embedded().expect("embedded feeds");
        assert!(!f.feeds.is_empty());
        assert!(!f.rules.is_empty());
        assert_eq!(f.pipeline.batch_size, 4);
        assert_eq!(f.pipeline.max_items, 250);
        assert_eq!(f.pipeline.fetch_timeout(), None);
    }

    #[test]
    fn missing_pipeline_section_uses_defaults() {
        let f = FeedsFile::from_toml_str(
            r#"
[[feeds]]
url = "https://example.com/rss"
"#,
        )
        .expect("minimal feeds");
        assert_eq!(f.pipeline.miss_ttl(), Duration::from_secs(360));
        assert_eq!(f.pipeline.window(), chrono::Duration::days(7));
        assert!(f.rules.is_empty());
    }

    #[test]
    fn relative_feed_url_is_rejected() {
        let err = FeedsFile::from_toml_str("[[feeds]]\nurl = \"/rss\"\n").unwrap_err();
        assert!(err.to_string().contains("/rss"));
    }

    #[serial_test::serial]
    #[test]
    fn env_drives_backend_secret_and_interval() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("feeds.toml");
        fs::write(&p, "[[feeds]]\nurl = \"https://a.test/rss\"\n").unwrap();

        env::set_var(ENV_FEEDS_CONFIG_PATH, p.display().to_string());
        env::set_var(ENV_CACHE_BACKEND, "file");
        env::set_var(ENV_CACHE_DIR, tmp.path().display().to_string());
        env::set_var(ENV_GENERATE_SECRET, "  ");
        env::set_var(ENV_REFRESH_INTERVAL_SECS, "42");

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.feeds.feeds.len(), 1);
        assert_eq!(cfg.cache_backend, CacheBackend::File(tmp.path().to_path_buf()));
        assert_eq!(cfg.generate_secret, None);
        assert_eq!(cfg.refresh_interval, Duration::from_secs(42));

        env::set_var(ENV_CACHE_BACKEND, "redis");
        assert!(AppConfig::from_env().is_err());

        for k in [
            ENV_FEEDS_CONFIG_PATH,
            ENV_CACHE_BACKEND,
            ENV_CACHE_DIR,
            ENV_GENERATE_SECRET,
            ENV_REFRESH_INTERVAL_SECS,
        ] {
            env::remove_var(k);
        }
    }
}
