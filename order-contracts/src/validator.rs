//! Contract validator.
//!
//! Pure, idempotent checks over opaque JSON input and over the typed order
//! payload. Errors are collected (never short-circuited) and returned as
//! `"path: reason"` strings; an empty list means the envelope is valid.

use std::collections::HashSet;

use serde_json::Value;

use crate::API_VERSION;
use crate::types::OrderPayload;

/// Closed set of group types on the wire.
pub const GROUP_TYPES: &[&str] = &["pack_together", "separate", "other"];

/// Closed set of review queue statuses on the wire.
pub const REVIEW_QUEUE_STATUSES: &[&str] = &[
    "pending_review",
    "in_review",
    "approved",
    "rejected",
    "dispatch_ready",
    "dispatched",
    "dispatch_failed",
];

/// Closed set of review decisions on the wire.
pub const REVIEW_DECISIONS: &[&str] = &["approve", "reject", "request_changes"];

/// Closed set of dispatch routes on the wire.
pub const DISPATCH_STATUSES: &[&str] = &["auto_dispatch", "review_queue"];

fn push(errors: &mut Vec<String>, path: &str, reason: &str) {
    errors.push(format!("{path}: {reason}"));
}

fn check_api_version(v: &Value, errors: &mut Vec<String>) {
    match v.get("api_version") {
        Some(Value::String(s)) if s == API_VERSION => {}
        Some(Value::String(s)) => push(
            errors,
            "api_version",
            &format!("expected \"{API_VERSION}\", got \"{s}\""),
        ),
        Some(_) => push(errors, "api_version", "must be a string"),
        None => push(errors, "api_version", "required"),
    }
}

fn check_opt_string(v: &Value, field: &str, errors: &mut Vec<String>) {
    if let Some(val) = v.get(field) {
        if !val.is_null() && !val.is_string() {
            push(errors, field, "must be a string");
        }
    }
}

fn check_opt_object(v: &Value, field: &str, errors: &mut Vec<String>) {
    if let Some(val) = v.get(field) {
        if !val.is_null() && !val.is_object() {
            push(errors, field, "must be an object");
        }
    }
}

fn check_enum(value: &str, allowed: &[&str], path: &str, errors: &mut Vec<String>) {
    if !allowed.contains(&value) {
        push(errors, path, &format!("\"{value}\" is not one of {allowed:?}"));
    }
}

/// Validates the raw ingest request envelope.
pub fn validate_ingest_request(v: &Value) -> Vec<String> {
    let mut errors = Vec::new();

    if !v.is_object() {
        push(&mut errors, "$", "request body must be a JSON object");
        return errors;
    }

    check_api_version(v, &mut errors);

    let source = v.get("source_text").or_else(|| v.get("text"));
    match source {
        Some(Value::String(_)) => {}
        Some(_) => push(&mut errors, "source_text", "must be a string"),
        None => push(&mut errors, "source_text", "required (or legacy `text`)"),
    }

    for field in ["store_id", "order_id", "audit_trace_id"] {
        check_opt_string(v, field, &mut errors);
    }
    check_opt_object(v, "metadata", &mut errors);
    check_opt_object(v, "simulate", &mut errors);

    if let Some(catalog) = v.get("menu_catalog") {
        if !catalog.is_null() && !catalog.is_array() && !catalog.is_object() {
            push(&mut errors, "menu_catalog", "must be an array or an object");
        }
    }
    if let Some(mods) = v.get("allowed_mods") {
        if !mods.is_null() {
            match mods.as_array() {
                Some(items) => {
                    for (i, item) in items.iter().enumerate() {
                        if !item.is_string() {
                            push(&mut errors, &format!("allowed_mods[{i}]"), "must be a string");
                        }
                    }
                }
                None => push(&mut errors, "allowed_mods", "must be an array of strings"),
            }
        }
    }

    errors
}

/// Validates the raw review decision envelope.
pub fn validate_decision_request(v: &Value) -> Vec<String> {
    let mut errors = Vec::new();

    if !v.is_object() {
        push(&mut errors, "$", "request body must be a JSON object");
        return errors;
    }

    check_api_version(v, &mut errors);

    match v.get("order_id") {
        Some(Value::String(s)) if !s.trim().is_empty() => {}
        Some(Value::String(_)) => push(&mut errors, "order_id", "must not be empty"),
        Some(_) => push(&mut errors, "order_id", "must be a string"),
        None => push(&mut errors, "order_id", "required"),
    }

    match v.get("decision") {
        Some(Value::String(s)) => check_enum(s, REVIEW_DECISIONS, "decision", &mut errors),
        Some(_) => push(&mut errors, "decision", "must be a string"),
        None => push(&mut errors, "decision", "required"),
    }

    match v.get("reviewer_id") {
        Some(Value::String(_)) => {}
        Some(_) => push(&mut errors, "reviewer_id", "must be a string"),
        None => push(&mut errors, "reviewer_id", "required"),
    }

    if let Some(Value::String(s)) = v.get("review_queue_status") {
        check_enum(s, REVIEW_QUEUE_STATUSES, "review_queue_status", &mut errors);
    } else if matches!(v.get("review_queue_status"), Some(val) if !val.is_null()) {
        push(&mut errors, "review_queue_status", "must be a string");
    }

    check_opt_string(v, "note", &mut errors);
    check_opt_string(v, "audit_trace_id", &mut errors);
    check_opt_object(v, "metadata", &mut errors);
    check_opt_object(v, "patched_order", &mut errors);

    errors
}

fn check_confidence(value: Option<f64>, path: &str, errors: &mut Vec<String>) {
    if let Some(c) = value {
        if !c.is_finite() {
            push(errors, path, "must be a finite number");
        } else if !(0.0..=1.0).contains(&c) {
            push(errors, path, "must be within [0, 1]");
        }
    }
}

/// Validates the typed order payload against the order invariants.
pub fn validate_order_payload(payload: &OrderPayload) -> Vec<String> {
    let mut errors = Vec::new();
    let order = &payload.order;

    // Item line indices: unique, and present in `lines`.
    let line_set: HashSet<u32> = order.lines.iter().map(|l| l.line_index).collect();
    let mut seen = HashSet::new();
    for (i, item) in order.items.iter().enumerate() {
        if !seen.insert(item.line_index) {
            push(
                &mut errors,
                &format!("order.items[{i}].line_index"),
                "duplicate line_index",
            );
        }
        if !line_set.contains(&item.line_index) {
            push(
                &mut errors,
                &format!("order.items[{i}].line_index"),
                "not present in order.lines",
            );
        }
        check_confidence(
            item.confidence_item,
            &format!("order.items[{i}].confidence_item"),
            &mut errors,
        );
        check_confidence(
            item.confidence_mods,
            &format!("order.items[{i}].confidence_mods"),
            &mut errors,
        );
    }

    // Groups: >= 2 distinct members, all pointing at existing items.
    let item_set: HashSet<u32> = order.items.iter().map(|i| i.line_index).collect();
    for (gi, group) in order.groups.iter().enumerate() {
        let distinct: HashSet<u32> = group.line_indices.iter().copied().collect();
        if distinct.len() < 2 {
            push(
                &mut errors,
                &format!("order.groups[{gi}].line_indices"),
                "needs at least two distinct members",
            );
        }
        if distinct.len() != group.line_indices.len() {
            push(
                &mut errors,
                &format!("order.groups[{gi}].line_indices"),
                "contains duplicates",
            );
        }
        for idx in &group.line_indices {
            if !item_set.contains(idx) {
                push(
                    &mut errors,
                    &format!("order.groups[{gi}].line_indices"),
                    &format!("references missing item line {idx}"),
                );
            }
        }
        check_confidence(
            group.confidence_group,
            &format!("order.groups[{gi}].confidence_group"),
            &mut errors,
        );
    }

    // Overall flag must equal the disjunction rule.
    if order.overall_needs_review != order.compute_overall_needs_review() {
        push(
            &mut errors,
            "order.overall_needs_review",
            "does not match item/group review flags",
        );
    }

    // Summary must be derived from the order.
    let expected = order.review_summary();
    if payload.review_summary.overall_needs_review != expected.overall_needs_review {
        push(
            &mut errors,
            "review_summary.overall_needs_review",
            "does not match order.overall_needs_review",
        );
    }
    if payload.review_summary.needs_review_item_line_indices
        != expected.needs_review_item_line_indices
    {
        push(
            &mut errors,
            "review_summary.needs_review_item_line_indices",
            "does not match flagged items",
        );
    }
    if payload.review_summary.needs_review_group_ids != expected.needs_review_group_ids {
        push(
            &mut errors,
            "review_summary.needs_review_group_ids",
            "does not match flagged groups",
        );
    }

    errors
}
