// src/cache.rs
//! Key/value cache with optional per-entry TTL.
//!
//! Two backends: an in-process map (default) and a directory of files that
//! survives restarts. Readers treat any store error as a miss.

use anyhow::Context;
use async_trait::async_trait;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    /// `ttl = None` stores without expiry.
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> anyhow::Result<()>;
    /// Live keys starting with `prefix`, ascending.
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
    fn name(&self) -> &'static str;
}

/// `get` that logs and degrades errors to a miss.
pub async fn get_or_miss(store: &dyn CacheStore, key: &str) -> Option<Vec<u8>> {
    match store.get(key).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(target: "cache", store = store.name(), key, error = %e, "cache read failed, treating as miss");
            None
        }
    }
}

/// `put` that only logs failures.
pub async fn put_logged(store: &dyn CacheStore, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
    let len = value.len();
    match store.put(key, value, ttl).await {
        Ok(()) => {
            tracing::debug!(target: "cache", store = store.name(), key, bytes = len, ttl_secs = ttl.map(|t| t.as_secs()), "cache write")
        }
        Err(e) => {
            tracing::warn!(target: "cache", store = store.name(), key, error = %e, "cache write failed")
        }
    }
}

struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |t| now < t)
    }
}

/// In-process store; expired entries are purged lazily on write.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> anyhow::Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.is_live(now));
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: ttl.map(|t| now + t),
            },
        );
        Ok(())
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

const KEY_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');
const ENTRY_EXT: &str = "entry";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize)]
struct FileMeta {
    key: String,
    /// Unix millis; absent means no expiry.
    expires_at_ms: Option<i64>,
}

impl FileMeta {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms.map_or(true, |t| now_ms < t)
    }
}

/// Directory-backed store: one `<key>.entry` file per key holding a JSON
/// metadata line followed by the raw value. Each put writes a uniquely named
/// temp file and renames it over the entry, so value and expiry always
/// change together.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub async fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating cache dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn stem(key: &str) -> String {
        utf8_percent_encode(key, KEY_SET).to_string()
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{ENTRY_EXT}", Self::stem(key)))
    }

    fn encode_entry(meta: &FileMeta, value: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut out = serde_json::to_vec(meta)?;
        out.push(b'\n');
        out.extend_from_slice(value);
        Ok(out)
    }

    fn decode_entry(path: &Path, mut bytes: Vec<u8>) -> anyhow::Result<(FileMeta, Vec<u8>)> {
        let split = bytes
            .iter()
            .position(|b| *b == b'\n')
            .with_context(|| format!("no metadata line in {}", path.display()))?;
        let meta = serde_json::from_slice(&bytes[..split])
            .with_context(|| format!("decoding {}", path.display()))?;
        let value = bytes.split_off(split + 1);
        Ok((meta, value))
    }

    async fn read_entry(path: &Path) -> anyhow::Result<Option<(FileMeta, Vec<u8>)>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Self::decode_entry(path, bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
        // Overlapping writers each get their own temp file.
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{}.{seq}.tmp", std::process::id()));
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("renaming into {}", path.display()));
        }
        Ok(())
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl CacheStore for FileStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let Some((meta, value)) = Self::read_entry(&self.entry_path(key)).await? else {
            return Ok(None);
        };
        Ok(meta.is_live(now_ms()).then_some(value))
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> anyhow::Result<()> {
        let meta = FileMeta {
            key: key.to_string(),
            expires_at_ms: ttl.map(|t| now_ms() + t.as_millis() as i64),
        };
        Self::write_atomic(&self.entry_path(key), &Self::encode_entry(&meta, &value)?).await
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let now = now_ms();
        let suffix = format!(".{ENTRY_EXT}");
        let mut rd = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("listing {}", self.dir.display()))?;
        let mut keys = Vec::new();
        while let Some(entry) = rd.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = name.strip_suffix(&suffix) else {
                continue;
            };
            let key = percent_decode_str(stem).decode_utf8_lossy().into_owned();
            if !key.starts_with(prefix) {
                continue;
            }
            if let Ok(Some((meta, _))) = Self::read_entry(&entry.path()).await {
                if meta.is_live(now) {
                    keys.push(meta.key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
