//! Normalized order model.
//!
//! `metadata` fields are open `serde_json::Value` maps by design; callers
//! read tags out of them (`ingest_engine`, `fallback_reason`, sources) but
//! the model never embeds typed pointers into metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ENTITY_VERSION;

fn entity_version() -> u32 {
    ENTITY_VERSION
}

fn default_metadata() -> Value {
    Value::Object(serde_json::Map::new())
}

/// One receipt line as produced by the parser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawLine {
    /// Dense 0-based index over item lines.
    pub line_index: u32,
    /// Original line text, trimmed.
    pub raw_line: String,
    /// Item name part (before any quantity marker / note).
    pub name_raw: String,
    /// Parsed quantity; 1 when no quantity marker was recognized.
    pub qty: i64,
    /// Inline note (text after the `備註:` marker), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_raw: Option<String>,
    /// True when a quantity token was present but did not parse.
    #[serde(default)]
    pub qty_unparsed: bool,
}

/// One ranked menu match for a raw line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub item_id: String,
    pub canonical_name: String,
    /// Similarity score in `[0, 1]`.
    pub score: f64,
}

/// Ranked candidates for one line, best first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineCandidates {
    pub line_index: u32,
    pub candidates: Vec<Candidate>,
}

/// A fully normalized order item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedItem {
    pub line_index: u32,
    pub raw_line: String,
    pub name_raw: String,
    pub name_normalized: String,
    /// Catalog item id; `None` when no confident mapping exists.
    pub item_code: Option<String>,
    pub qty: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_raw: Option<String>,
    #[serde(default)]
    pub mods: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_item: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_mods: Option<f64>,
    pub needs_review: bool,
    #[serde(default = "default_metadata")]
    pub metadata: Value,
    #[serde(default = "entity_version")]
    pub version: u32,
}

/// Cross-line grouping kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GroupType {
    PackTogether,
    Separate,
    Other,
}

impl GroupType {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupType::PackTogether => "pack_together",
            GroupType::Separate => "separate",
            GroupType::Other => "other",
        }
    }
}

/// A validated cross-line group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub group_id: String,
    #[serde(rename = "type")]
    pub group_type: GroupType,
    pub label: String,
    /// At least two distinct existing item line indices.
    pub line_indices: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_group: Option<f64>,
    pub needs_review: bool,
    #[serde(default = "default_metadata")]
    pub metadata: Value,
    #[serde(default = "entity_version")]
    pub version: u32,
}

/// A significant decision taken while normalizing, kept on the order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionNote {
    /// Stable token (`no_items_detected`, `llm_fallback`,
    /// `item_below_threshold`, `group_rejected`, ...).
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl DecisionNote {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            line_index: None,
            group_id: None,
            detail: None,
        }
    }

    pub fn for_line(code: impl Into<String>, line_index: u32) -> Self {
        Self {
            line_index: Some(line_index),
            ..Self::new(code)
        }
    }

    pub fn for_group(code: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            group_id: Some(group_id.into()),
            ..Self::new(code)
        }
    }
}

/// The normalized order produced by the merge step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedOrder {
    pub source_text: String,
    pub order_id: String,
    pub items: Vec<NormalizedItem>,
    pub groups: Vec<Group>,
    pub lines: Vec<RawLine>,
    #[serde(default)]
    pub audit_events: Vec<DecisionNote>,
    pub overall_needs_review: bool,
    #[serde(default = "default_metadata")]
    pub metadata: Value,
    #[serde(default = "entity_version")]
    pub version: u32,
}

impl NormalizedOrder {
    /// The invariant definition of `overall_needs_review`.
    ///
    /// An order with no items at all always needs a human look.
    pub fn compute_overall_needs_review(&self) -> bool {
        self.items.is_empty()
            || self
                .items
                .iter()
                .any(|i| i.needs_review || i.item_code.is_none() || i.qty < 1)
            || self.groups.iter().any(|g| g.needs_review)
    }

    /// Derives the review summary matching this order.
    pub fn review_summary(&self) -> ReviewSummary {
        ReviewSummary {
            overall_needs_review: self.overall_needs_review,
            needs_review_item_line_indices: self
                .items
                .iter()
                .filter(|i| i.needs_review)
                .map(|i| i.line_index)
                .collect(),
            needs_review_group_ids: self
                .groups
                .iter()
                .filter(|g| g.needs_review)
                .map(|g| g.group_id.clone())
                .collect(),
        }
    }
}

/// Derived review summary carried in the order payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewSummary {
    pub overall_needs_review: bool,
    pub needs_review_item_line_indices: Vec<u32>,
    pub needs_review_group_ids: Vec<String>,
}

/// Review queue lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewQueueStatus {
    PendingReview,
    InReview,
    Approved,
    Rejected,
    DispatchReady,
    Dispatched,
    DispatchFailed,
}

impl ReviewQueueStatus {
    /// Statuses listed in the tracking section (terminal or downstream).
    pub fn is_tracking(self) -> bool {
        matches!(
            self,
            ReviewQueueStatus::Approved
                | ReviewQueueStatus::Rejected
                | ReviewQueueStatus::DispatchReady
                | ReviewQueueStatus::Dispatched
                | ReviewQueueStatus::DispatchFailed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReviewQueueStatus::PendingReview => "pending_review",
            ReviewQueueStatus::InReview => "in_review",
            ReviewQueueStatus::Approved => "approved",
            ReviewQueueStatus::Rejected => "rejected",
            ReviewQueueStatus::DispatchReady => "dispatch_ready",
            ReviewQueueStatus::Dispatched => "dispatched",
            ReviewQueueStatus::DispatchFailed => "dispatch_failed",
        }
    }
}

/// Human review decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
    RequestChanges,
}

impl ReviewDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewDecision::Approve => "approve",
            ReviewDecision::Reject => "reject",
            ReviewDecision::RequestChanges => "request_changes",
        }
    }
}

/// Full order payload as persisted and returned by ingest/review.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderPayload {
    pub order: NormalizedOrder,
    pub review_summary: ReviewSummary,
    pub review_queue_status: ReviewQueueStatus,
    pub audit_trace_id: String,
    #[serde(default = "default_metadata")]
    pub metadata: Value,
    #[serde(default = "entity_version")]
    pub version: u32,
}

/// Persisted review record, keyed by `order_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewRecord {
    pub order_id: String,
    pub audit_trace_id: String,
    pub order_payload: OrderPayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(line_index: u32, item_code: Option<&str>, needs_review: bool) -> NormalizedItem {
        NormalizedItem {
            line_index,
            raw_line: format!("line {line_index}"),
            name_raw: format!("name {line_index}"),
            name_normalized: format!("name {line_index}"),
            item_code: item_code.map(str::to_string),
            qty: 1,
            note_raw: None,
            mods: Vec::new(),
            group_id: None,
            confidence_item: Some(0.9),
            confidence_mods: None,
            needs_review,
            metadata: json!({}),
            version: 1,
        }
    }

    fn order(items: Vec<NormalizedItem>) -> NormalizedOrder {
        let lines = items
            .iter()
            .map(|i| RawLine {
                line_index: i.line_index,
                raw_line: i.raw_line.clone(),
                name_raw: i.name_raw.clone(),
                qty: i.qty,
                note_raw: None,
                qty_unparsed: false,
            })
            .collect();
        let mut o = NormalizedOrder {
            source_text: String::new(),
            order_id: "ord-test".into(),
            items,
            groups: Vec::new(),
            lines,
            audit_events: Vec::new(),
            overall_needs_review: false,
            metadata: json!({}),
            version: 1,
        };
        o.overall_needs_review = o.compute_overall_needs_review();
        o
    }

    #[test]
    fn overall_flag_follows_missing_item_code() {
        let clean = order(vec![item(0, Some("I001"), false)]);
        assert!(!clean.overall_needs_review);

        let unmapped = order(vec![item(0, None, false)]);
        assert!(unmapped.overall_needs_review);
    }

    #[test]
    fn summary_collects_flagged_lines_and_groups() {
        let mut o = order(vec![item(0, Some("I001"), true), item(1, Some("I002"), false)]);
        o.groups.push(Group {
            group_id: "g1".into(),
            group_type: GroupType::Separate,
            label: "分裝".into(),
            line_indices: vec![0, 1],
            confidence_group: Some(0.3),
            needs_review: true,
            metadata: json!({}),
            version: 1,
        });
        o.overall_needs_review = o.compute_overall_needs_review();

        let summary = o.review_summary();
        assert!(summary.overall_needs_review);
        assert_eq!(summary.needs_review_item_line_indices, vec![0]);
        assert_eq!(summary.needs_review_group_ids, vec!["g1".to_string()]);
    }

    #[test]
    fn enum_wire_tokens_are_snake_case() {
        assert_eq!(
            serde_json::to_value(ReviewQueueStatus::DispatchReady).unwrap(),
            json!("dispatch_ready")
        );
        assert_eq!(
            serde_json::to_value(GroupType::PackTogether).unwrap(),
            json!("pack_together")
        );
        assert_eq!(
            serde_json::to_value(ReviewDecision::RequestChanges).unwrap(),
            json!("request_changes")
        );
    }
}
