//! Queries over the audit stream: unresolved-review index and per-order
//! pipeline traces.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::event::{AuditEvent, AuditEventKind};
use crate::log::{AuditLog, AuditResult};

/// One row of the unresolved-review index.
#[derive(Debug, Clone, Serialize)]
pub struct UnresolvedReview {
    pub order_id: String,
    pub latest_event_at: DateTime<Utc>,
    /// Events flagged for review since the last manual correction.
    pub open_flags: usize,
    pub last_event_type: AuditEventKind,
}

/// Concatenated latest pipeline-stage payloads for one order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrderTrace {
    pub order_id: String,
    pub raw_text: Option<String>,
    pub parse_result: Option<Value>,
    pub candidates: Option<Value>,
    pub llm_request: Option<Value>,
    pub llm_response: Option<Value>,
    pub merge_result: Option<Value>,
    pub final_output: Option<Value>,
    pub manual_corrections: Vec<Value>,
}

fn flags_review(event: &AuditEvent) -> bool {
    if event.needs_review {
        return true;
    }
    if event.fallback_reason.as_deref().is_some_and(|r| !r.is_empty()) {
        return true;
    }
    event
        .final_output
        .as_ref()
        .and_then(|o| o.get("overall_needs_review"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Builds the unresolved index over a full event stream.
///
/// An order is unresolved iff at least one review-flagged event occurs
/// after its most recent `manual_correction` (or there is no correction
/// at all). Rows are sorted by latest event timestamp descending.
pub fn unresolved_reviews(events: &[AuditEvent], limit: usize) -> Vec<UnresolvedReview> {
    let mut by_order: BTreeMap<&str, Vec<&AuditEvent>> = BTreeMap::new();
    for event in events {
        by_order.entry(event.order_id.as_str()).or_default().push(event);
    }

    let mut rows: Vec<UnresolvedReview> = Vec::new();
    for (order_id, order_events) in by_order {
        let last_correction = order_events
            .iter()
            .filter(|e| e.event_type == AuditEventKind::ManualCorrection)
            .map(|e| e.timestamp)
            .max();

        let open_flags = order_events
            .iter()
            .filter(|e| match last_correction {
                Some(at) => e.timestamp > at,
                None => true,
            })
            .filter(|e| flags_review(e))
            .count();

        if open_flags == 0 {
            continue;
        }

        let Some(latest) = order_events.iter().max_by_key(|e| e.timestamp) else {
            continue;
        };
        rows.push(UnresolvedReview {
            order_id: order_id.to_string(),
            latest_event_at: latest.timestamp,
            open_flags,
            last_event_type: latest.event_type,
        });
    }

    rows.sort_by(|a, b| b.latest_event_at.cmp(&a.latest_event_at));
    rows.truncate(limit);
    rows
}

/// Assembles the pipeline trace for one order: the latest non-null value
/// of each stage payload plus every manual correction.
pub fn order_trace(events: &[AuditEvent], order_id: &str) -> OrderTrace {
    let mut trace = OrderTrace {
        order_id: order_id.to_string(),
        ..OrderTrace::default()
    };

    for event in events.iter().filter(|e| e.order_id == order_id) {
        if let Some(text) = &event.raw_text {
            trace.raw_text = Some(text.clone());
        }
        if let Some(v) = &event.parse_result {
            trace.parse_result = Some(v.clone());
        }
        if let Some(v) = &event.candidates {
            trace.candidates = Some(v.clone());
        }
        if let Some(v) = &event.llm_request {
            trace.llm_request = Some(v.clone());
        }
        if let Some(v) = &event.llm_response {
            trace.llm_response = Some(v.clone());
        }
        if let Some(v) = &event.merge_result {
            trace.merge_result = Some(v.clone());
        }
        if let Some(v) = &event.final_output {
            trace.final_output = Some(v.clone());
        }
        if event.event_type == AuditEventKind::ManualCorrection {
            if let Some(correction) = &event.human_correction {
                trace.manual_corrections.push(correction.clone());
            }
        }
    }

    trace
}

impl AuditLog {
    /// Unresolved-review index over the whole log.
    pub async fn unresolved_reviews(&self, limit: usize) -> AuditResult<Vec<UnresolvedReview>> {
        Ok(unresolved_reviews(&self.read_all().await?, limit))
    }

    /// Pipeline trace for one order.
    pub async fn get_order_trace(&self, order_id: &str) -> AuditResult<OrderTrace> {
        Ok(order_trace(&self.read_all().await?, order_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn at(event: AuditEvent, minutes: i64) -> AuditEvent {
        AuditEvent {
            timestamp: DateTime::<Utc>::from_timestamp(1_760_000_000, 0).unwrap()
                + Duration::minutes(minutes),
            ..event
        }
    }

    #[test]
    fn flagged_order_without_correction_is_unresolved() {
        let mut flagged = AuditEvent::new("ord-1", AuditEventKind::IngestPipeline);
        flagged.needs_review = true;
        let events = vec![at(flagged, 0)];

        let rows = unresolved_reviews(&events, 10);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].order_id, "ord-1");
        assert_eq!(rows[0].open_flags, 1);
    }

    #[test]
    fn correction_resolves_earlier_flags_only() {
        let mut flagged = AuditEvent::new("ord-1", AuditEventKind::IngestPipeline);
        flagged.needs_review = true;
        let correction = AuditEvent::new("ord-1", AuditEventKind::ManualCorrection);

        // Flag, then correction: resolved.
        let resolved = vec![at(flagged.clone(), 0), at(correction.clone(), 5)];
        assert!(unresolved_reviews(&resolved, 10).is_empty());

        // Flag, correction, then a new flag: unresolved again.
        let mut late_flag = AuditEvent::new("ord-1", AuditEventKind::IngestPipeline);
        late_flag.fallback_reason = Some("llm_timeout".into());
        let reopened = vec![at(flagged, 0), at(correction, 5), at(late_flag, 9)];
        let rows = unresolved_reviews(&reopened, 10);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].open_flags, 1);
    }

    #[test]
    fn final_output_flag_counts_as_unresolved() {
        let mut event = AuditEvent::new("ord-2", AuditEventKind::IngestPipeline);
        event.final_output = Some(json!({"overall_needs_review": true}));
        let rows = unresolved_reviews(&[at(event, 0)], 10);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn rows_sort_newest_first_and_truncate() {
        let mut a = AuditEvent::new("ord-a", AuditEventKind::IngestPipeline);
        a.needs_review = true;
        let mut b = AuditEvent::new("ord-b", AuditEventKind::IngestPipeline);
        b.needs_review = true;

        let rows = unresolved_reviews(&[at(a, 0), at(b, 30)], 10);
        assert_eq!(rows[0].order_id, "ord-b");

        let mut c = AuditEvent::new("ord-c", AuditEventKind::IngestPipeline);
        c.needs_review = true;
        let rows = unresolved_reviews(&[at(c, 0)], 0);
        assert!(rows.is_empty());
    }

    #[test]
    fn trace_takes_latest_non_null_per_stage() {
        let mut first = AuditEvent::new("ord-1", AuditEventKind::IngestPipeline);
        first.raw_text = Some("v1".into());
        first.parse_result = Some(json!({"lines": 1}));

        let mut second = AuditEvent::new("ord-1", AuditEventKind::IngestPipeline);
        second.raw_text = Some("v2".into());

        let mut correction = AuditEvent::new("ord-1", AuditEventKind::ManualCorrection);
        correction.human_correction = Some(json!({"before": {}, "after": {}}));

        let events = vec![at(first, 0), at(second, 1), at(correction, 2)];
        let trace = order_trace(&events, "ord-1");
        assert_eq!(trace.raw_text.as_deref(), Some("v2"));
        assert_eq!(trace.parse_result, Some(json!({"lines": 1})));
        assert_eq!(trace.manual_corrections.len(), 1);
    }
}
