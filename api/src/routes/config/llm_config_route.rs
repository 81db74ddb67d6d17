//! GET / PUT `/api/orders/llm-config`. The api key is only ever exposed
//! redacted.

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
use crate::routes::config::pipeline_config_route::StoreQuery;

fn llm_view(cfg: &StoreConfig) -> Value {
    json!({
        "store_id": cfg.store_id,
        "provider": cfg.llm.provider,
        "model": cfg.llm.model,
        "timeout_s": cfg.llm.timeout_s,
        "enabled": cfg.llm.enabled,
        "api_key": cfg.llm.redacted_api_key(),
        "llm_config_version": cfg.llm_config_version,
    })
}

#[instrument(name = "llm_config_get_route", skip(state))]
pub async fn llm_config_get_route(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StoreQuery>,
) -> Response {
    match state.ingest.configs().get_config(&query.store_id).await {
        Ok(cfg) => ApiReply::data(llm_view(&cfg)).send(StatusCode::OK),
        Err(e) => AppError::from(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct LlmConfigUpdate {
    #[serde(default = "default_store")]
    pub store_id: String,
    #[serde(flatten)]
    pub patch: Value,
}

fn default_store() -> String {
    "default".to_string()
}

#[instrument(name = "llm_config_put_route", skip(state, body))]
pub async fn llm_config_put_route(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LlmConfigUpdate>,
) -> Response {
    match state
        .ingest
        .configs()
        .update_llm_config(&body.store_id, &body.patch)
        .await
    {
        Ok(cfg) => {
            info!(store_id = %cfg.store_id, "llm config updated via api");
            ApiReply::data(llm_view(&cfg)).send(StatusCode::OK)
        }
        Err(e) => AppError::from(e).into_response(),
    }
}
