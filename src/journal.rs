// src/journal.rs
//! Failure journal: refresh failures stored in the cache under `error_<ts>`
//! for a week, readable through `GET /errors`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::{get_or_miss, put_logged, CacheStore};

pub const ERROR_KEY_PREFIX: &str = "error_";
pub const ERROR_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const RECENT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub stack: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub site: String,
    pub context: String,
    pub timestamp: String,
    pub error: ErrorDetail,
}

impl FailureRecord {
    pub fn new(context: &str, err: &anyhow::Error, at: DateTime<Utc>) -> Self {
        Self {
            site: env!("CARGO_PKG_NAME").to_string(),
            context: context.to_string(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            error: ErrorDetail {
                message: err.to_string(),
                stack: format!("{err:?}"),
            },
        }
    }

    pub fn key(&self) -> String {
        format!("{ERROR_KEY_PREFIX}{}", self.timestamp)
    }
}

/// Log and persist one failure. Never fails itself.
pub async fn record_failure(store: &dyn CacheStore, context: &str, err: &anyhow::Error) {
    let record = FailureRecord::new(context, err, Utc::now());
    tracing::error!(target: "journal", context, error = %err, "{context} failed");
    match serde_json::to_vec(&record) {
        Ok(bytes) => put_logged(store, &record.key(), bytes, Some(ERROR_TTL)).await,
        Err(e) => tracing::warn!(target: "journal", error = %e, "could not encode failure record"),
    }
}

/// Up to `limit` most recent records, newest first. Unreadable records are skipped.
pub async fn recent_failures(store: &dyn CacheStore, limit: usize) -> anyhow::Result<Vec<FailureRecord>> {
    let keys = store.list(ERROR_KEY_PREFIX).await?;
    let mut out = Vec::with_capacity(limit.min(keys.len()));
    // RFC 3339 UTC keys sort chronologically.
    for key in keys.iter().rev() {
        if out.len() == limit {
            break;
        }
        let Some(bytes) = get_or_miss(store, key).await else {
            continue;
        };
        match serde_json::from_slice::<FailureRecord>(&bytes) {
            Ok(r) => out.push(r),
            Err(e) => tracing::debug!(target: "journal", key = %key, error = %e, "skipping unreadable failure record"),
        }
    }
    out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(out)
}
