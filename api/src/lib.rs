//! HTTP surface of the POS ingest gateway.
//!
//! `start()` wires the file-backed stores, the ingest service and the
//! legacy bridge into an axum router under `/api/orders`, then serves it.
//! `build_state_at` / `build_router` are public so tests can drive the
//! exact production router against a scratch data root.

pub mod core;
pub mod error_handler;
pub mod middleware_layer;
pub mod routes;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tracing::info;

use audit_log::AuditLog;
use ingest_engine::IngestService;
use ingest_engine::service::EngineEnv;
use legacy_bridge::{BridgeConfig, LegacyBridge};
use pipeline_cache::PipelineCache;
use review_store::ReviewStore;
use store_config::{ConfigStore, LlmEnvDefaults};

use crate::core::app_state::AppState;
use crate::core::events::OrderEventHub;
use crate::error_handler::AppError;
use crate::middleware_layer::request_id::request_id_mw;
use crate::routes::config::llm_config_route::{llm_config_get_route, llm_config_put_route};
use crate::routes::config::pipeline_config_route::{
    pipeline_config_get_route, pipeline_config_put_route,
};
use crate::routes::events::events_route::order_events_route;
use crate::routes::fixtures::fixtures_route::ingest_fixtures_route;
use crate::routes::fixtures::test_suite_route::ingest_test_suite_route;
use crate::routes::ingest::ingest_route::{ingest_pos_text_route, store_ingest_pos_text_route};
use crate::routes::legacy::bridge_routes::{legacy_pull_once_route, legacy_status_route};
use crate::routes::review::clear_route::review_clear_route;
use crate::routes::review::decision_route::review_decision_route;
use crate::routes::review::detail_route::{
    review_delete_route, review_detail_route, review_trace_route,
};
use crate::routes::review::list_route::{
    review_details_route, review_list_route, review_unresolved_route,
};
use crate::routes::status::engine_status_route::engine_status_route;
use crate::routes::status::health_route::health_route;

/// Builds state from the `POS_STORE_CONFIG_ROOT` data root.
pub async fn build_state() -> Result<Arc<AppState>, AppError> {
    let root = std::env::var("POS_STORE_CONFIG_ROOT")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data/pos_pipeline"));
    build_state_at(&root).await
}

/// Builds state against an explicit data root.
pub async fn build_state_at(root: &Path) -> Result<Arc<AppState>, AppError> {
    let audit = Arc::new(AuditLog::new(root.join("audit.log.jsonl")));
    let configs = Arc::new(ConfigStore::new(root, LlmEnvDefaults::from_env()));
    let cache = Arc::new(
        PipelineCache::load(root.join("cache_store.json"), Some(audit.clone()))
            .await
            .map_err(|e| AppError::Startup(e.to_string()))?,
    );
    let reviews = Arc::new(
        ReviewStore::load(root.join("review_store.json"), audit.clone())
            .await
            .map_err(|e| AppError::Startup(e.to_string()))?,
    );
    let ingest = Arc::new(IngestService::new(
        configs,
        cache,
        audit,
        reviews,
        EngineEnv::from_env(),
    ));

    let bridge_cfg = BridgeConfig::from_env();
    let bridge = if bridge_cfg.endpoint.trim().is_empty() {
        None
    } else {
        Some(Arc::new(
            LegacyBridge::new(bridge_cfg, ingest.clone())
                .map_err(|e| AppError::Startup(e.to_string()))?,
        ))
    };

    Ok(Arc::new(AppState {
        ingest,
        bridge,
        events: Arc::new(OrderEventHub::default()),
    }))
}

/// The full production router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let orders = Router::new()
        .route("/ingest-pos-text", post(ingest_pos_text_route))
        .route(
            "/stores/{store_id}/ingest-pos-text",
            post(store_ingest_pos_text_route),
        )
        .route("/review", get(review_list_route))
        .route("/review/details", get(review_details_route))
        .route("/review/unresolved", get(review_unresolved_route))
        .route("/review/decision", post(review_decision_route))
        .route("/review/clear-test-data", post(review_clear_route))
        .route(
            "/review/{order_id}",
            get(review_detail_route).delete(review_delete_route),
        )
        .route("/review/{order_id}/trace", get(review_trace_route))
        .route(
            "/pipeline-config",
            get(pipeline_config_get_route).put(pipeline_config_put_route),
        )
        .route(
            "/llm-config",
            get(llm_config_get_route).put(llm_config_put_route),
        )
        .route("/ingest-engine/status", get(engine_status_route))
        .route("/ingest-fixtures", get(ingest_fixtures_route))
        .route("/ingest-test-suite", post(ingest_test_suite_route))
        .route("/events", get(order_events_route))
        .route("/legacy-bridge/status", get(legacy_status_route))
        .route("/legacy-bridge/pull-once", post(legacy_pull_once_route));

    Router::new()
        .route("/health", get(health_route))
        .nest("/api/orders", orders)
        .layer(middleware::from_fn(request_id_mw))
        .with_state(state)
}

/// Boots the gateway: state, router, optional legacy poller, listener.
pub async fn start() -> Result<(), AppError> {
    let state = build_state().await?;

    if let Some(bridge) = state.bridge.clone() {
        if bridge.config().enabled {
            tokio::spawn(bridge.run());
        }
    }

    let app = build_router(state);

    let addr = std::env::var("POS_BIND_ADDR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(AppError::Bind)?;

    info!(%addr, "pos gateway listening");
    axum::serve(listener, app).await.map_err(AppError::Server)
}
