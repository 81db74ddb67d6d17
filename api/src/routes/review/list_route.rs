//! GET `/api/orders/review`, `/review/details` and `/review/unresolved`.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use ingest_engine::merge::REVIEW_CONFIDENCE_THRESHOLD;

use crate::core::{app_state::AppState, http::response_envelope::ApiReply};
use crate::error_handler::AppError;

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    20
}

/// Paged listing split into pending-review and tracking sections.
#[instrument(name = "review_list_route", skip(state))]
pub async fn review_list_route(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PageParams>,
) -> Response {
    let page = state.ingest.reviews().list(params.page, params.page_size).await;
    ApiReply::data(json!({
        "items": page.items,
        "pendingReview": page.pending_review,
        "tracking": page.tracking,
        "total": page.total,
        "next_cursor": page.next_cursor,
    }))
    .send(StatusCode::OK)
}

/// Paged details: full payloads plus low-confidence line indices.
#[instrument(name = "review_details_route", skip(state))]
pub async fn review_details_route(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PageParams>,
) -> Response {
    let page = state.ingest.reviews().list(params.page, params.page_size).await;
    let details: Vec<_> = page
        .items
        .iter()
        .map(|record| {
            let low_confidence: Vec<u32> = record
                .order_payload
                .order
                .items
                .iter()
                .filter(|i| {
                    i.needs_review
                        || i.confidence_item
                            .is_some_and(|c| c < REVIEW_CONFIDENCE_THRESHOLD)
                })
                .map(|i| i.line_index)
                .collect();
            json!({
                "order_id": record.order_id,
                "order_payload": record.order_payload,
                "low_confidence_line_indices": low_confidence,
                "created_at": record.created_at,
                "updated_at": record.updated_at,
            })
        })
        .collect();

    ApiReply::data(json!({
        "items": details,
        "total": page.total,
        "next_cursor": page.next_cursor,
    }))
    .send(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct UnresolvedParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Unresolved-review index over the audit stream.
#[instrument(name = "review_unresolved_route", skip(state))]
pub async fn review_unresolved_route(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UnresolvedParams>,
) -> Response {
    match state.ingest.audit().unresolved_reviews(params.limit).await {
        Ok(rows) => ApiReply::data(json!({"items": rows}))
            .send(StatusCode::OK),
        Err(e) => AppError::Http {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "AUDIT_ERROR",
            message: e.to_string(),
        }
        .into_response(),
    }
}
