//! GET / PUT `/api/orders/pipeline-config`.

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument};

use store_config::StoreConfig;

use crate::core::{app_state::AppState, http::response_envelope::ApiReply};
use crate::error_handler::AppError;

#[derive(Debug, Deserialize)]
pub struct StoreQuery {
    #[serde(default = "default_store")]
    pub store_id: String,
}

fn default_store() -> String {
    "default".to_string()
}

fn config_view(cfg: &StoreConfig) -> Value {
    json!({
        "store_id": cfg.store_id,
        "menu_catalog": cfg.menu_catalog,
        "allowed_mods": cfg.allowed_mods,
        "menu_catalog_version": cfg.menu_catalog_version,
        "allowed_mods_version": cfg.allowed_mods_version,
        "llm_config_version": cfg.llm_config_version,
    })
}

#[instrument(name = "pipeline_config_get_route", skip(state))]
pub async fn pipeline_config_get_route(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StoreQuery>,
) -> Response {
    match state.ingest.configs().get_config(&query.store_id).await {
        Ok(cfg) => {
            ApiReply::data(config_view(&cfg)).send(StatusCode::OK)
        }
        Err(e) => AppError::from(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct PipelineConfigUpdate {
    #[serde(default = "default_store")]
    pub store_id: String,
    #[serde(default)]
    pub menu_catalog: Option<Value>,
    #[serde(default)]
    pub allowed_mods: Option<Value>,
}

#[instrument(name = "pipeline_config_put_route", skip(state, body))]
pub async fn pipeline_config_put_route(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PipelineConfigUpdate>,
) -> Response {
    let updated = state
        .ingest
        .configs()
        .update_config(
            &body.store_id,
            body.menu_catalog.as_ref(),
            body.allowed_mods.as_ref(),
        )
        .await;

    match updated {
        Ok(cfg) => {
            info!(store_id = %cfg.store_id, "pipeline config updated via api");
            ApiReply::data(config_view(&cfg)).send(StatusCode::OK)
        }
        Err(e) => AppError::from(e).into_response(),
    }
}
