// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod cache;
pub mod config;
pub mod ingest;
pub mod journal;
pub mod payload;
pub mod relevance;
pub mod telemetry;

pub use crate::api::{create_router, AppState};
pub use crate::ingest::{refresh_cache, run_pipeline, PipelineContext, RefreshSummary};
