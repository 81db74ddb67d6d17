//! Structured output contract and reply validation.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use order_contracts::types::{LineCandidates, RawLine};

use crate::reason::FallbackReason;

/// One normalized item as returned by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmItem {
    pub line_index: u32,
    /// Must come from the candidate set of `line_index`, or be null.
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub mods: Vec<String>,
    #[serde(default)]
    pub confidence_item: Option<f64>,
    #[serde(default)]
    pub confidence_mods: Option<f64>,
    #[serde(default)]
    pub needs_review: bool,
}

/// One grouping instruction as returned by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmGroup {
    pub group_id: String,
    #[serde(rename = "type")]
    pub group_type: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub line_indices: Vec<u32>,
    #[serde(default)]
    pub confidence_group: Option<f64>,
    #[serde(default)]
    pub needs_review: bool,
}

/// The full reply contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuredOutput {
    #[serde(default)]
    pub items: Vec<LlmItem>,
    #[serde(default)]
    pub groups: Vec<LlmGroup>,
}

const GROUP_TYPES: &[&str] = &["pack_together", "separate", "other"];

/// Strips a Markdown code fence if the model wrapped its JSON anyway.
fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start().strip_suffix("```").unwrap_or(rest).trim()
}

/// Parses and validates a raw model reply against the input constraints.
///
/// Checks, in order: JSON well-formedness, schema shape, exact line
/// coverage (every input `line_index` exactly once), finite confidences,
/// closed group types, and candidate membership of chosen item ids.
pub fn parse_and_validate(
    raw: &str,
    lines: &[RawLine],
    candidates: &[LineCandidates],
) -> Result<StructuredOutput, FallbackReason> {
    let body = strip_fence(raw);

    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|_| FallbackReason::LlmInvalidJson)?;
    let output: StructuredOutput =
        serde_json::from_value(value).map_err(|_| FallbackReason::LlmSchemaViolation)?;

    // Exact line coverage.
    let expected: HashSet<u32> = lines.iter().map(|l| l.line_index).collect();
    let mut seen = HashSet::new();
    for item in &output.items {
        if !expected.contains(&item.line_index) || !seen.insert(item.line_index) {
            return Err(FallbackReason::LlmSchemaViolation);
        }
    }
    if seen.len() != expected.len() {
        return Err(FallbackReason::LlmSchemaViolation);
    }

    // Confidence sanity.
    let finite = |c: Option<f64>| c.is_none_or(f64::is_finite);
    for item in &output.items {
        if !finite(item.confidence_item) || !finite(item.confidence_mods) {
            return Err(FallbackReason::LlmSchemaViolation);
        }
    }
    for group in &output.groups {
        if !finite(group.confidence_group) {
            return Err(FallbackReason::LlmSchemaViolation);
        }
        if !GROUP_TYPES.contains(&group.group_type.as_str()) {
            return Err(FallbackReason::LlmSchemaViolation);
        }
    }

    // Candidate membership for chosen item ids.
    for item in &output.items {
        let Some(chosen) = &item.item_id else {
            continue;
        };
        let in_candidates = candidates
            .iter()
            .find(|c| c.line_index == item.line_index)
            .is_some_and(|c| c.candidates.iter().any(|cand| &cand.item_id == chosen));
        if !in_candidates {
            return Err(FallbackReason::LlmItemNotInCandidates);
        }
    }

    Ok(output)
}
