//! POST `/api/orders/ingest-pos-text` (and the store-scoped variant).

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tracing::{info, instrument};

use order_contracts::envelopes::IngestRequest;
use order_contracts::validator;

use crate::core::{
    app_state::AppState,
    http::response_envelope::{ApiReply, validation_failure},
};
use crate::error_handler::AppError;

async fn run_ingest(state: &AppState, body: Value) -> Response {
    let errors = validator::validate_ingest_request(&body);
    if !errors.is_empty() {
        return validation_failure(errors);
    }

    let req: IngestRequest = match serde_json::from_value(body) {
        Ok(req) => req,
        Err(e) => return AppError::BadRequest(e.to_string()).into_response(),
    };

    match state.ingest.ingest_pos_text(&req).await {
        Ok(resp) => {
            let order_id = resp.order_payload.order.order_id.clone();
            state.events.publish(
                "order_ingested",
                &order_id,
                json!({
                    "review_queue_status": resp.status.as_str(),
                    "overall_needs_review": resp.order_payload.order.overall_needs_review,
                    "trace_id": resp.trace_id,
                }),
            );
            info!(%order_id, status = resp.status.as_str(), "ingest request served");
            ApiReply::data(resp).send(StatusCode::OK)
        }
        Err(e) => AppError::from(e).into_response(),
    }
}

/// Body-routed ingest.
#[instrument(name = "ingest_pos_text_route", skip(state, body))]
pub async fn ingest_pos_text_route(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    run_ingest(&state, body).await
}

/// Path-scoped ingest: the path store id wins over body and metadata.
#[instrument(name = "store_ingest_pos_text_route", skip(state, body))]
pub async fn store_ingest_pos_text_route(
    State(state): State<Arc<AppState>>,
    Path(store_id): Path<String>,
    Json(mut body): Json<Value>,
) -> Response {
    if let Some(obj) = body.as_object_mut() {
        obj.insert("store_id".to_string(), json!(store_id));
    }
    run_ingest(&state, body).await
}
