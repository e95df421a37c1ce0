// src/api.rs
use anyhow::Context;
use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics::counter;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cache::{get_or_miss, put_logged};
use crate::ingest::{refresh_cache, run_pipeline, PipelineContext};
use crate::journal::{recent_failures, RECENT_LIMIT};
use crate::telemetry::Metrics;
use crate::payload::{
    cache_version, decode_payload, encode_payload, filter_payload_by_topics, scheduled_version,
    CACHE_KEY,
};

pub const ADMIN_CONTEXT: &str = "News Cache Refresh";

const X_CACHE_STATUS: HeaderName = HeaderName::from_static("x-cache-status");
const X_FEED_VERSION: HeaderName = HeaderName::from_static("x-feed-version");
const X_GEN_AUTH: HeaderName = HeaderName::from_static("x-gen-auth");

#[derive(Clone)]
pub struct AppState {
    pub pipeline: PipelineContext,
    /// `None` rejects every admin call.
    pub generate_secret: Option<Arc<str>>,
    pub metrics: Option<Metrics>,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([X_CACHE_STATUS, X_FEED_VERSION]);

    Router::new()
        .route("/", get(newsfeed))
        .route("/newsfeed", get(newsfeed))
        .route("/admin/refresh-news", get(admin_refresh).post(admin_refresh))
        .route("/errors", get(errors))
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(metrics_endpoint))
        .fallback(|| async { (StatusCode::NOT_FOUND, "Not found") })
        .layer(cors)
        .layer(middleware::from_fn(feed_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Answers every OPTIONS with 204 and stamps the feed version on all responses.
async fn feed_headers(req: Request, next: Next) -> Response {
    let mut resp = if req.method() == Method::OPTIONS {
        let mut r = StatusCode::NO_CONTENT.into_response();
        let h = r.headers_mut();
        h.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        h.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, HEAD, POST, OPTIONS"),
        );
        h.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type, x-gen-auth"),
        );
        r
    } else {
        next.run(req).await
    };
    if let Ok(v) = HeaderValue::from_str(&cache_version()) {
        resp.headers_mut().insert(X_FEED_VERSION, v);
    }
    resp
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub topic: Option<String>,
}

fn feed_response(body: Vec<u8>, cache_status: &'static str, max_age: u64) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (X_CACHE_STATUS, cache_status.to_string()),
            (header::CACHE_CONTROL, format!("public, max-age={max_age}")),
        ],
        Body::from(body),
    )
        .into_response()
}

/// 500 body for a failed miss: no stale fallback.
pub fn failure_response(err: &anyhow::Error) -> Response {
    tracing::error!(target: "api", error = ?err, "feed request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "Failed to fetch news",
            "message": format!("{err:#}"),
            "stack": format!("{err:?}"),
            "debug": cache_version(),
        })),
    )
        .into_response()
}

fn apply_topic(state: &AppState, body: Vec<u8>, topic: Option<&str>) -> anyhow::Result<Vec<u8>> {
    let Some(topic) = topic.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(body);
    };
    let values = decode_payload(&body).context("feed payload is not a JSON array")?;
    let engine = state.pipeline.relevance.current();
    let filtered = filter_payload_by_topics(values, &engine, &[topic.to_string()]);
    serde_json::to_vec(&filtered).context("encoding filtered payload")
}

async fn newsfeed(State(state): State<AppState>, Query(q): Query<FeedQuery>) -> Response {
    let settings = Arc::clone(&state.pipeline.settings);
    let store = state.pipeline.store.as_ref();

    if let Some(bytes) = get_or_miss(store, CACHE_KEY).await {
        if decode_payload(&bytes).is_some() {
            counter!("cache_hits_total").increment(1);
            tracing::debug!(target: "api", "cache hit");
            return match apply_topic(&state, bytes, q.topic.as_deref()) {
                Ok(body) => feed_response(body, "HIT", settings.hit_max_age_secs),
                Err(e) => failure_response(&e),
            };
        }
        tracing::warn!(target: "api", "cached feed is not a JSON array, rebuilding");
    }

    counter!("cache_misses_total").increment(1);
    let run = run_pipeline(&state.pipeline).await;
    let bytes = match encode_payload(&cache_version(), &run.items).context("encoding feed payload") {
        Ok(b) => b,
        Err(e) => return failure_response(&e),
    };

    // Persist off the response path.
    let bg_store = Arc::clone(&state.pipeline.store);
    let bg_bytes = bytes.clone();
    let ttl = settings.miss_ttl();
    tokio::spawn(async move {
        put_logged(bg_store.as_ref(), CACHE_KEY, bg_bytes, Some(ttl)).await;
    });

    match apply_topic(&state, bytes, q.topic.as_deref()) {
        Ok(body) => feed_response(body, "MISS", settings.miss_max_age_secs),
        Err(e) => failure_response(&e),
    }
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(secret) = state.generate_secret.as_deref() else {
        return false;
    };
    headers
        .get(&X_GEN_AUTH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|given| given == secret)
}

async fn admin_refresh(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !authorized(&state, &headers) {
        tracing::warn!(target: "api", "admin refresh rejected");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    let summary = refresh_cache(&state.pipeline, &scheduled_version(), ADMIN_CONTEXT).await;
    Json(summary).into_response()
}

async fn errors(State(state): State<AppState>) -> Response {
    match recent_failures(state.pipeline.store.as_ref(), RECENT_LIMIT).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => {
            tracing::warn!(target: "api", error = %e, "listing failure records failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to retrieve errors" })),
            )
                .into_response()
        }
    }
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(m) => m.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn failure_body_has_message_stack_and_version() {
        let err = anyhow::anyhow!("socket closed").context("fetching feeds");
        let resp = failure_response(&err);
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["error"], "Failed to fetch news");
        assert_eq!(v["message"], "fetching feeds: socket closed");
        assert!(v["stack"].as_str().unwrap().contains("socket closed"));
        assert_eq!(v["debug"], cache_version());
    }

    #[test]
    fn feed_response_headers() {
        let resp = feed_response(b"[]".to_vec(), "HIT", 240);
        assert_eq!(resp.headers()["x-cache-status"], "HIT");
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "public, max-age=240");
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
    }
}
