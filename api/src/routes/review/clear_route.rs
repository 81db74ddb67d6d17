//! POST `/api/orders/review/clear-test-data`.

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

use review_store::ClearScope;

use crate::core::{app_state::AppState, http::response_envelope::ApiReply};
use crate::error_handler::AppError;

#[derive(Debug, Deserialize)]
pub struct ClearRequest {
    pub scope: ClearScope,
}

#[instrument(name = "review_clear_route", skip(state))]
pub async fn review_clear_route(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ClearRequest>,
) -> Response {
    match state.ingest.reviews().clear(body.scope).await {
        Ok((deleted, remaining)) => {
            info!(deleted, remaining, "review store cleared via api");
            ApiReply::data(json!({
                "deleted_count": deleted,
                "remaining_count": remaining,
            }))
            .send(StatusCode::OK)
        }
        Err(e) => AppError::from(e).into_response(),
    }
}
