//! Rule fallback: deterministic item selection when the LLM path is
//! unavailable or rejected its reply.

use order_contracts::types::LineCandidates;

/// Minimum top-candidate score for an automatic mapping.
pub const AUTO_PICK_THRESHOLD: f64 = 0.85;

/// Confidence assigned when no candidate scored at all.
pub const NO_CANDIDATE_CONFIDENCE: f64 = 0.4;

/// Outcome of rule-based selection for one line.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSelection {
    pub item_code: Option<String>,
    pub canonical_name: Option<String>,
    pub confidence: f64,
    /// True when a top candidate existed but stayed below the threshold.
    pub below_threshold: bool,
}

/// Picks `candidates[0]` iff its score clears [`AUTO_PICK_THRESHOLD`].
pub fn select_rule_item(set: &LineCandidates) -> RuleSelection {
    match set.candidates.first() {
        Some(top) if top.score >= AUTO_PICK_THRESHOLD => RuleSelection {
            item_code: Some(top.item_id.clone()),
            canonical_name: Some(top.canonical_name.clone()),
            confidence: top.score,
            below_threshold: false,
        },
        Some(top) => RuleSelection {
            item_code: None,
            canonical_name: None,
            confidence: top.score,
            below_threshold: true,
        },
        None => RuleSelection {
            item_code: None,
            canonical_name: None,
            confidence: NO_CANDIDATE_CONFIDENCE,
            below_threshold: false,
        },
    }
}
