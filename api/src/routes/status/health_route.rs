//! GET `/health`: liveness plus a coarse LLM configuration summary.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::Response,
};
use serde_json::json;
use tracing::instrument;

use order_contracts::API_VERSION;

use crate::core::{app_state::AppState, http::response_envelope::ApiReply};

#[instrument(name = "health_route", skip(state))]
pub async fn health_route(State(state): State<Arc<AppState>>) -> Response {
    let llm = match state.ingest.configs().get_config("default").await {
        Ok(cfg) => json!({
            "provider": cfg.llm.provider,
            "model": cfg.llm.model,
            "configured": cfg.llm.api_key.is_some(),
        }),
        Err(e) => json!({"error": e.to_string()}),
    };

    ApiReply::data(json!({
        "ok": true,
        "api_version": API_VERSION,
        "llm": llm,
    }))
    .send(StatusCode::OK)
}
