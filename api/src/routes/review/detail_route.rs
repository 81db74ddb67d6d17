//! GET / DELETE `/api/orders/review/{orderId}` and the trace view.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{info, instrument};

use crate::core::{app_state::AppState, http::response_envelope::ApiReply};
use crate::error_handler::AppError;

/// Single review record, or 404.
#[instrument(name = "review_detail_route", skip(state))]
pub async fn review_detail_route(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Response {
    match state.ingest.reviews().get(&order_id).await {
        Some(record) => {
            ApiReply::data(record).send(StatusCode::OK)
        }
        None => AppError::NotFound.into_response(),
    }
}

/// Purges one record (reject-and-remove; no audit trail by design).
#[instrument(name = "review_delete_route", skip(state))]
pub async fn review_delete_route(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Response {
    match state.ingest.reviews().delete(&order_id).await {
        Ok(true) => {
            state
                .events
                .publish("order_deleted", &order_id, json!({}));
            info!(%order_id, "review record deleted via api");
            ApiReply::data(json!({"ok": true, "order_id": order_id}))
                .send(StatusCode::OK)
        }
        Ok(false) => AppError::NotFound.into_response(),
        Err(e) => AppError::from(e).into_response(),
    }
}

/// Concatenated pipeline trace from the audit log.
#[instrument(name = "review_trace_route", skip(state))]
pub async fn review_trace_route(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Response {
    match state.ingest.audit().get_order_trace(&order_id).await {
        Ok(trace) => ApiReply::data(trace).send(StatusCode::OK),
        Err(e) => AppError::Http {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "AUDIT_ERROR",
            message: e.to_string(),
        }
        .into_response(),
    }
}
