// src/relevance.rs
//! Relevance model: weighted topic classification plus the feed acceptance
//! policy, both driven by `config/relevance.toml`.

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, SystemTime};
use tracing::info;

use crate::ingest::types::NormalizedNewsItem;

// --- env defaults & names ---
pub const DEFAULT_RELEVANCE_CONFIG_PATH: &str = "config/relevance.toml";
pub const DEFAULT_TOPIC_THRESHOLD: u32 = 5;

pub const ENV_RELEVANCE_CONFIG_PATH: &str = "RELEVANCE_CONFIG_PATH";
pub const ENV_RELEVANCE_THRESHOLD: &str = "RELEVANCE_THRESHOLD";

/// Shipped copy of the relevance config, used when nothing is on disk.
pub const EMBEDDED_RELEVANCE_TOML: &str = include_str!("../config/relevance.toml");

// Dev logging gate: RELEVANCE_DEV_LOG=1 AND dev env (debug or SHUTTLE_ENV in {local,development,dev})
pub(crate) fn dev_logging_enabled() -> bool {
    let on = std::env::var("RELEVANCE_DEV_LOG").ok().as_deref() == Some("1");
    on && is_dev_env()
}

fn is_dev_env() -> bool {
    if cfg!(debug_assertions) {
        return true;
    }
    matches!(
        std::env::var("SHUTTLE_ENV")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "local" | "development" | "dev"
    )
}

pub(crate) fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Anonymized dev logger: hashed text id plus short lists, never raw text.
fn dev_log_relevance(event: &str, text: &str, matched: &[String], reason: &str) {
    if !dev_logging_enabled() {
        return;
    }
    let id = anon_hash(text);
    let matched_short = truncate_vec(matched, 5);
    info!(
        target: "relevance",
        %id, event, reason,
        matched = ?matched_short
    );
}

pub(crate) fn truncate_vec<T: ToString>(v: &[T], max: usize) -> Vec<String> {
    v.iter().take(max).map(|x| x.to_string()).collect()
}

fn parse_threshold_env(raw: Option<String>) -> Option<u32> {
    raw.and_then(|s| s.trim().parse::<u32>().ok())
}

/* ----------------------------
Config schema (from TOML)
---------------------------- */

#[derive(Debug, Clone, Deserialize)]
pub struct RelevanceRoot {
    pub classifier: ClassifierCfg,
    #[serde(default)]
    pub topics: Vec<TopicCfg>,
    pub acceptance: AcceptanceCfg,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierCfg {
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    pub default_topic: String,
    pub fallback_topic: String,
    #[serde(default)]
    pub core_terms: Vec<String>,
}

fn default_threshold() -> u32 {
    DEFAULT_TOPIC_THRESHOLD
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicCfg {
    pub name: String,
    #[serde(default)]
    pub exclusions: Vec<String>,
    /// term → weight; matched as case-insensitive substrings.
    #[serde(default)]
    pub keywords: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcceptanceCfg {
    /// Regexes; distinct hits are counted.
    pub keywords: Vec<String>,
    pub identity: String,
    #[serde(default)]
    pub trusted_sources: Vec<String>,
    pub trusted_link: String,
    pub false_positive: String,
}

#[derive(Debug)]
struct CompiledTopic {
    name: String,
    exclusions: Vec<String>,
    keywords: Vec<(String, u32)>,
}

#[derive(Debug)]
struct CompiledAcceptance {
    keywords: Vec<Regex>,
    identity: Regex,
    trusted_sources: Vec<String>,
    trusted_link: Regex,
    false_positive: Regex,
}

/// Classification result for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub topics: Vec<String>,
    /// Per-topic scores, in config order.
    pub scores: Vec<(String, u32)>,
}

fn compile_re(what: &str, pattern: &str) -> anyhow::Result<Regex> {
    Regex::new(pattern).map_err(|e| anyhow::anyhow!("acceptance `{}` regex error: {}", what, e))
}

/// Holds the parsed config and its compiled matchers.
#[derive(Debug)]
pub struct RelevanceEngine {
    pub cfg: RelevanceRoot,
    topics: Vec<CompiledTopic>,
    acceptance: CompiledAcceptance,
}

impl RelevanceEngine {
    /// Load from RELEVANCE_CONFIG_PATH, else `config/relevance.toml`, else the
    /// embedded copy. An explicitly configured path must be readable.
    pub fn from_toml() -> anyhow::Result<Self> {
        let explicit = std::env::var(ENV_RELEVANCE_CONFIG_PATH).ok().map(PathBuf::from);
        let path = explicit
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RELEVANCE_CONFIG_PATH));

        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if explicit.is_some() => {
                return Err(anyhow::anyhow!(
                    "Failed to read relevance config at {}: {}",
                    path.display(),
                    e
                ));
            }
            Err(_) => {
                info!(target: "relevance", "no relevance config on disk, using embedded default");
                EMBEDDED_RELEVANCE_TOML.to_string()
            }
        };

        let mut eng = Self::from_toml_str(&content)?;

        if let Some(t) = parse_threshold_env(std::env::var(ENV_RELEVANCE_THRESHOLD).ok()) {
            eng.cfg.classifier.threshold = t;
        }

        Ok(eng)
    }

    pub fn embedded() -> anyhow::Result<Self> {
        Self::from_toml_str(EMBEDDED_RELEVANCE_TOML)
    }

    /// Load from a TOML string
    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        let cfg: RelevanceRoot = toml::from_str(toml_str)?;

        let topics = cfg
            .topics
            .iter()
            .map(|t| CompiledTopic {
                name: t.name.to_lowercase(),
                exclusions: t.exclusions.iter().map(|x| x.to_lowercase()).collect(),
                keywords: t
                    .keywords
                    .iter()
                    .map(|(k, w)| (k.to_lowercase(), (*w).max(1)))
                    .collect(),
            })
            .collect();

        let a = &cfg.acceptance;
        let keywords = a
            .keywords
            .iter()
            .enumerate()
            .map(|(i, p)| compile_re(&format!("keywords[{i}]"), p))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let acceptance = CompiledAcceptance {
            keywords,
            identity: compile_re("identity", &a.identity)?,
            trusted_sources: a.trusted_sources.iter().map(|s| s.to_lowercase()).collect(),
            trusted_link: compile_re("trusted_link", &a.trusted_link)?,
            false_positive: compile_re("false_positive", &a.false_positive)?,
        };

        Ok(Self {
            cfg,
            topics,
            acceptance,
        })
    }

    pub fn threshold(&self) -> u32 {
        self.cfg.classifier.threshold
    }

    pub fn fallback_topic(&self) -> &str {
        &self.cfg.classifier.fallback_topic
    }

    /// Tag an item with every topic whose weighted score clears the threshold.
    pub fn classify(&self, title: &str, description: &str) -> Classification {
        let text = format!("{title} {description}").to_lowercase();
        let title_lc = title.to_lowercase();
        let threshold = self.threshold();

        let mut topics = Vec::new();
        let mut scores = Vec::with_capacity(self.topics.len());
        for topic in &self.topics {
            let excluded = topic.exclusions.iter().any(|x| text.contains(x.as_str()))
                && !text.contains(topic.name.as_str());
            let score = if excluded {
                0
            } else {
                topic
                    .keywords
                    .iter()
                    .filter(|(k, _)| text.contains(k.as_str()))
                    .map(|(k, w)| if title_lc.contains(k.as_str()) { w * 2 } else { *w })
                    .sum()
            };
            if score >= threshold {
                topics.push(topic.name.clone());
            }
            scores.push((topic.name.clone(), score));
        }

        if topics.is_empty() {
            let core = self
                .cfg
                .classifier
                .core_terms
                .iter()
                .any(|t| text.contains(t.to_lowercase().as_str()));
            topics.push(if core {
                self.cfg.classifier.default_topic.clone()
            } else {
                self.cfg.classifier.fallback_topic.clone()
            });
        }

        Classification { topics, scores }
    }

    fn keyword_hits(&self, text: &str) -> Vec<String> {
        self.acceptance
            .keywords
            .iter()
            .filter(|re| re.is_match(text))
            .map(|re| re.as_str().to_string())
            .collect()
    }

    fn title_hit(&self, title: &str) -> bool {
        self.acceptance.keywords.iter().any(|re| re.is_match(title))
    }

    /// Feed acceptance. `authoritative` feeds need one keyword hit; others need
    /// several hits, a single hit in the title, or an identity mention from a
    /// trusted source without the known false positive.
    pub fn accepts(&self, item: &NormalizedNewsItem, authoritative: bool) -> bool {
        let text = format!("{} {}", item.title, item.description).to_lowercase();
        let title = item.title.to_lowercase();
        let hits = self.keyword_hits(&text);

        let (ok, reason) = if authoritative {
            (!hits.is_empty(), "authoritative")
        } else if hits.len() > 1 {
            (true, "multi_hit")
        } else if hits.len() == 1 && self.title_hit(&title) {
            (true, "title_hit")
        } else {
            let a = &self.acceptance;
            let source = item.source.to_lowercase();
            let trusted = a.trusted_sources.iter().any(|s| *s == source)
                || a.trusted_link.is_match(&item.link);
            let ok = a.identity.is_match(&text) && trusted && !a.false_positive.is_match(&text);
            (ok, if ok { "identity_trusted" } else { "insufficient" })
        };

        dev_log_relevance(if ok { "accept" } else { "reject" }, &text, &hits, reason);
        ok
    }

    /// Stricter pass for video items: several hits or a title hit only.
    pub fn accepts_media(&self, item: &NormalizedNewsItem) -> bool {
        let text = format!("{} {}", item.title, item.description).to_lowercase();
        let hits = self.keyword_hits(&text);
        let ok = hits.len() > 1 || (hits.len() == 1 && self.title_hit(&item.title.to_lowercase()));
        dev_log_relevance(if ok { "media_accept" } else { "media_reject" }, &text, &hits, "media");
        ok
    }

    /// True when any of `topics` is active; the fallback topic never is.
    pub fn matches_topics(&self, topics: &[String], active: &[String]) -> bool {
        let fallback = self.fallback_topic();
        topics
            .iter()
            .filter(|t| t.as_str() != fallback)
            .any(|t| active.iter().any(|a| a.eq_ignore_ascii_case(t)))
    }

    /// Topic-filtered view: fallback-only items are always left out.
    pub fn filter_by_topics(
        &self,
        items: Vec<NormalizedNewsItem>,
        active: &[String],
    ) -> Vec<NormalizedNewsItem> {
        items
            .into_iter()
            .filter(|it| self.matches_topics(&it.topics, active))
            .collect()
    }
}

/// Shared, swappable engine. Readers take a cheap snapshot.
#[derive(Clone)]
pub struct RelevanceHandle {
    inner: Arc<RwLock<Arc<RelevanceEngine>>>,
}

impl RelevanceHandle {
    pub fn new(engine: RelevanceEngine) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(engine))),
        }
    }

    /// Current engine. A poisoned lock still yields the last good value.
    pub fn current(&self) -> Arc<RelevanceEngine> {
        match self.inner.read() {
            Ok(g) => Arc::clone(&g),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn replace(&self, engine: RelevanceEngine) {
        match self.inner.write() {
            Ok(mut g) => *g = Arc::new(engine),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(engine),
        }
    }
}

fn hot_reload_enabled() -> bool {
    let want = std::env::var("RELEVANCE_HOT_RELOAD")
        .ok()
        .map(|v| v == "1")
        .unwrap_or(false);
    want && is_dev_env()
}

/// Dev-only: poll the config file and swap the engine when it changes.
pub fn start_hot_reload_thread(handle: RelevanceHandle, path: PathBuf) {
    if !hot_reload_enabled() {
        return;
    }

    thread::spawn(move || {
        let poll = Duration::from_secs(2);
        let mut last_mtime: Option<SystemTime> = None;

        loop {
            if let Ok(mtime) = fs::metadata(&path).and_then(|m| m.modified()) {
                let changed = last_mtime.is_some_and(|prev| mtime > prev);
                if last_mtime.is_none() || changed {
                    last_mtime = Some(mtime);
                }
                if changed {
                    match fs::read_to_string(&path)
                        .map_err(anyhow::Error::from)
                        .and_then(|c| RelevanceEngine::from_toml_str(&c))
                    {
                        Ok(engine) => {
                            handle.replace(engine);
                            info!(target: "relevance", path = %path.display(), "relevance config reloaded");
                        }
                        Err(e) => {
                            tracing::warn!(target: "relevance", error = %e, "relevance reload failed, keeping previous config");
                        }
                    }
                }
            }
            thread::sleep(poll);
        }
    });
}
