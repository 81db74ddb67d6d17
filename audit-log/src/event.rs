//! Audit event records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Typed event kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    IngestPipeline,
    DispatchDecision,
    ReviewDecision,
    CacheHit,
    CacheMiss,
    CacheWrite,
    ManualCorrection,
}

/// One append-only audit record.
///
/// Stage payloads are open JSON; which ones are populated depends on the
/// event kind (an `ingest_pipeline` event carries the pipeline trace, a
/// `manual_correction` carries the before/after pair, cache events carry
/// only metadata).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub order_id: String,
    pub event_type: AuditEventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_request: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<Value>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub needs_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_correction: Option<Value>,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    1
}

impl AuditEvent {
    /// A bare event of the given kind; stage payloads default to `None`.
    pub fn new(order_id: impl Into<String>, event_type: AuditEventKind) -> Self {
        Self {
            order_id: order_id.into(),
            event_type,
            timestamp: Utc::now(),
            raw_text: None,
            parse_result: None,
            candidates: None,
            llm_request: None,
            llm_response: None,
            fallback_reason: None,
            merge_result: None,
            final_output: None,
            metadata: Value::Object(serde_json::Map::new()),
            needs_review: false,
            human_correction: None,
            version: 1,
        }
    }
}
