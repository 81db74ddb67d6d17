//! Dispatch classifier.
//!
//! A pure pass over a normalized order deciding between immediate
//! downstream dispatch and the human review queue. Lives next to the
//! order model so the review store can re-classify after a patch without
//! pulling in the ingest engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::NormalizedOrder;

/// Where an order goes after classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DispatchRoute {
    AutoDispatch,
    ReviewQueue,
}

impl DispatchRoute {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchRoute::AutoDispatch => "auto_dispatch",
            DispatchRoute::ReviewQueue => "review_queue",
        }
    }
}

/// Classification result with the reasons that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchDecision {
    pub route: DispatchRoute,
    pub reasons: Vec<String>,
    /// `merge_metadata` when honored from `order.metadata.dispatch_decision`,
    /// otherwise `classifier`.
    pub source: String,
}

/// Classifies a normalized order.
pub fn classify(order: &NormalizedOrder) -> DispatchDecision {
    // An upstream stage may have pinned the decision in metadata.
    if let Some(pinned) = order
        .metadata
        .get("dispatch_decision")
        .and_then(Value::as_str)
    {
        let route = match pinned {
            "auto_dispatch" => Some(DispatchRoute::AutoDispatch),
            "review_queue" => Some(DispatchRoute::ReviewQueue),
            _ => None,
        };
        if let Some(route) = route {
            return DispatchDecision {
                route,
                reasons: vec![format!("metadata.dispatch_decision={pinned}")],
                source: "merge_metadata".to_string(),
            };
        }
    }

    let mut reasons = Vec::new();
    if order.overall_needs_review {
        reasons.push("overall_needs_review".to_string());
    }
    for item in &order.items {
        if item.needs_review {
            reasons.push(format!("item[{}].needs_review", item.line_index));
        }
        if item.item_code.is_none() {
            reasons.push(format!("item[{}].item_code missing", item.line_index));
        }
        if item.qty < 1 {
            reasons.push(format!("item[{}].qty < 1", item.line_index));
        }
    }
    for group in &order.groups {
        if group.needs_review {
            reasons.push(format!("group[{}].needs_review", group.group_id));
        }
    }

    let route = if reasons.is_empty() {
        DispatchRoute::AutoDispatch
    } else {
        DispatchRoute::ReviewQueue
    };

    DispatchDecision {
        route,
        reasons,
        source: "classifier".to_string(),
    }
}
