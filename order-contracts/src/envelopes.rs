//! HTTP envelope types for ingest and review decisions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{
    NormalizedOrder, OrderPayload, ReviewDecision, ReviewQueueStatus,
};

/// Failure-injection switches accepted by the ingest endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulateFlags {
    /// Skip the LLM stage as if it had timed out.
    #[serde(default)]
    pub llm_timeout: bool,
}

/// Body of `POST /api/orders/ingest-pos-text`.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub api_version: String,
    #[serde(default)]
    pub source_text: Option<String>,
    /// Legacy alias for `source_text`.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub store_id: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub audit_trace_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    /// Inline catalog override for this request only.
    #[serde(default)]
    pub menu_catalog: Option<Value>,
    /// Inline allowed-mods override for this request only.
    #[serde(default)]
    pub allowed_mods: Option<Value>,
    #[serde(default)]
    pub simulate: Option<SimulateFlags>,
}

impl IngestRequest {
    /// Receipt text, preferring `source_text` over the `text` alias.
    pub fn receipt_text(&self) -> Option<&str> {
        self.source_text.as_deref().or(self.text.as_deref())
    }

    /// Store id from the body field or `metadata.store_id`.
    pub fn resolved_store_id(&self) -> Option<&str> {
        if let Some(id) = self.store_id.as_deref() {
            return Some(id);
        }
        self.metadata
            .as_ref()
            .and_then(|m| m.get("store_id"))
            .and_then(Value::as_str)
    }
}

/// Successful ingest response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub accepted: bool,
    pub version: u32,
    pub api_version: String,
    pub order_payload: OrderPayload,
    pub status: ReviewQueueStatus,
    pub trace_id: String,
}

/// Body of `POST /api/orders/review/decision`.
#[derive(Debug, Clone, Deserialize)]
pub struct DecisionRequest {
    pub order_id: String,
    pub api_version: String,
    #[serde(default)]
    pub audit_trace_id: Option<String>,
    #[serde(default)]
    pub review_queue_status: Option<ReviewQueueStatus>,
    pub decision: ReviewDecision,
    pub reviewer_id: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub patched_order: Option<NormalizedOrder>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Decision outcome returned to the reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub order_id: String,
    pub review_queue_status: ReviewQueueStatus,
    pub decision: ReviewDecision,
    pub order_payload: OrderPayload,
}
