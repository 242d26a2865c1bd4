//! HTTP API surface
//!
//! A thin axum router over the service layer:
//! - PromQL: instant query, range query, series, label values
//! - Remote read / remote write (snappy + protobuf)
//! - Debug cache snapshot and runtime config patching

pub mod prometheus;
mod validate;

pub use validate::{config_patch_schema, FieldSchema};

use crate::cache::IdCache;
use crate::config::Config;
use crate::ingest::SampleWriter;
use crate::query::PromExecutor;

use axum::routing::{get, post};
use axum::Router;
use parking_lot::RwLock;
use std::sync::Arc;

/// Shared state for all handlers
#[derive(Clone)]
pub struct ApiState {
    pub executor: Arc<PromExecutor>,
    pub writer: Arc<SampleWriter>,
    pub cache: Arc<IdCache>,
    pub config: Arc<RwLock<Config>>,
    /// Allowed-field tree for the config endpoint, derived once at startup
    pub config_schema: Arc<FieldSchema>,
}

impl ApiState {
    pub fn new(
        executor: Arc<PromExecutor>,
        writer: Arc<SampleWriter>,
        cache: Arc<IdCache>,
        config: Arc<RwLock<Config>>,
    ) -> Self {
        Self {
            executor,
            writer,
            cache,
            config,
            config_schema: Arc::new(config_patch_schema()),
        }
    }
}

/// Build the HTTP API router
pub fn build_http_router(state: ApiState) -> Router {
    use tower_http::cors::{Any, CorsLayer};

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // PromQL API
        .route("/api/v1/query", get(prometheus::instant_query))
        .route("/api/v1/query", post(prometheus::instant_query))
        .route("/api/v1/query_range", get(prometheus::range_query))
        .route("/api/v1/query_range", post(prometheus::range_query))
        .route("/api/v1/series", get(prometheus::series))
        .route("/api/v1/series", post(prometheus::series))
        .route("/api/v1/label/:name/values", get(prometheus::label_values))
        // Remote read/write
        .route("/api/v1/read", post(prometheus::remote_read))
        .route("/api/v1/write", post(prometheus::remote_write))
        // Operations
        .route("/debug/cache", get(prometheus::debug_cache))
        .route("/api/v1/config", post(prometheus::update_config))
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}
