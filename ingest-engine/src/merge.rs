//! Merge / validation step.
//!
//! Combines parsed lines, candidate sets and (when present) validated LLM
//! output into a [`NormalizedOrder`]: item selection, mods merging, group
//! resolution, per-item and per-group review flags, and the overall flag.

use serde_json::Value;
use tracing::debug;

use order_contracts::types::{
    DecisionNote, Group, GroupType, NormalizedItem, NormalizedOrder,
};
use order_contracts::ENTITY_VERSION;
use llm_adapter::StructuredOutput;
use store_config::model::MenuItem;

use crate::fallback::select_rule_item;
use crate::parser::ParsedReceipt;

/// Item/group confidences below this are flagged for review.
pub const REVIEW_CONFIDENCE_THRESHOLD: f64 = 0.6;

/// Inputs that stay constant across one merge.
pub struct MergeContext<'a> {
    pub order_id: &'a str,
    pub source_text: &'a str,
    pub menu: &'a [MenuItem],
    pub allowed_mods: &'a [String],
    /// Set when the LLM path was skipped or rejected.
    pub fallback_reason: Option<&'a str>,
}

/// Mods extracted from one note.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteMods {
    pub mods: Vec<String>,
    /// A modification was asked for that the store does not allow.
    pub invented: bool,
}

const CONJUNCTIONS: &[char] = &['跟', '和', '與', '、', '，', ','];
const NEGATIVE_PREFIXES: &[&str] = &["不要加", "不要", "不加", "去"];

/// Extracts store-allowed mods from free-form note text.
///
/// Multi-clause notes split on common conjunctions; a bare clause after a
/// negative one inherits the negation (`不要加薑絲跟香菜` reads as two
/// negative mods).
pub fn extract_note_mods(note: &str, allowed: &[String]) -> NoteMods {
    let mut out = NoteMods::default();
    let mut negative_context = false;

    for clause in note.split(CONJUNCTIONS) {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }

        // Grouping instructions (同袋, 分裝, ...) are not modifications.
        if detect_group_hint(clause).is_some() {
            negative_context = false;
            continue;
        }

        let (negative, target) = match NEGATIVE_PREFIXES
            .iter()
            .find_map(|p| clause.strip_prefix(p))
        {
            Some(rest) => (true, rest.trim()),
            None => match clause.strip_prefix('加') {
                Some(rest) => (false, rest.trim()),
                // A bare clause inherits the polarity of the previous one.
                None => (negative_context, clause),
            },
        };
        negative_context = negative;

        if target.is_empty() {
            continue;
        }

        let attempts: Vec<String> = if negative {
            vec![
                format!("不加{target}"),
                format!("不要{target}"),
                clause.to_string(),
            ]
        } else {
            vec![format!("加{target}"), clause.to_string()]
        };

        match attempts.iter().find(|a| allowed.iter().any(|m| m == *a)) {
            Some(found) => {
                if !out.mods.iter().any(|m| m == found) {
                    out.mods.push(found.clone());
                }
            }
            None => out.invented = true,
        }
    }

    out
}

/// A grouping instruction recognized from note text.
#[derive(Debug, Clone, Copy, PartialEq)]
struct GroupHint {
    group_type: GroupType,
    /// `上面兩項`: restrict to the two preceding item lines.
    narrow_to_two: bool,
}

fn detect_group_hint(text: &str) -> Option<GroupHint> {
    let group_type = if text.contains("同袋") {
        GroupType::PackTogether
    } else if text.contains("分裝") || text.contains("分開") {
        GroupType::Separate
    } else if text.contains("上面兩項") {
        GroupType::Other
    } else {
        return None;
    };
    Some(GroupHint {
        group_type,
        narrow_to_two: text.contains("上面兩項"),
    })
}

fn clamp_confidence(c: Option<f64>) -> Option<f64> {
    c.map(|v| v.clamp(0.0, 1.0))
}

fn empty_metadata() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Runs the merge; see the module docs for the step order.
pub fn merge(
    parsed: &ParsedReceipt,
    candidates: &[order_contracts::types::LineCandidates],
    llm: Option<&StructuredOutput>,
    ctx: &MergeContext<'_>,
) -> NormalizedOrder {
    let mut notes: Vec<DecisionNote> = Vec::new();

    if parsed.lines.is_empty() {
        notes.push(DecisionNote::new("no_items_detected"));
        let mut order = NormalizedOrder {
            source_text: ctx.source_text.to_string(),
            order_id: ctx.order_id.to_string(),
            items: Vec::new(),
            groups: Vec::new(),
            lines: Vec::new(),
            audit_events: notes,
            overall_needs_review: true,
            metadata: empty_metadata(),
            version: ENTITY_VERSION,
        };
        order.overall_needs_review = order.compute_overall_needs_review();
        return order;
    }

    if llm.is_none() {
        let mut note = DecisionNote::new("llm_fallback");
        note.detail = ctx.fallback_reason.map(str::to_string);
        notes.push(note);
    }

    // ---- Items -----------------------------------------------------------
    let mut items: Vec<NormalizedItem> = Vec::with_capacity(parsed.lines.len());
    for line in &parsed.lines {
        let set = candidates.iter().find(|c| c.line_index == line.line_index);
        let llm_item = llm.and_then(|out| {
            out.items.iter().find(|i| i.line_index == line.line_index)
        });

        let mut invented_mod = false;
        let mut mods: Vec<String> = Vec::new();
        let mut llm_flag = false;

        let (item_code, canonical_name, confidence_item) = match llm_item {
            Some(chosen) => {
                llm_flag = chosen.needs_review;
                for m in &chosen.mods {
                    if ctx.allowed_mods.iter().any(|a| a == m) {
                        if !mods.iter().any(|seen| seen == m) {
                            mods.push(m.clone());
                        }
                    } else {
                        invented_mod = true;
                    }
                }
                let canonical = chosen.item_id.as_ref().and_then(|id| {
                    ctx.menu
                        .iter()
                        .find(|mi| &mi.item_id == id)
                        .map(|mi| mi.canonical_name.clone())
                });
                let confidence = clamp_confidence(chosen.confidence_item).or_else(|| {
                    set.and_then(|s| s.candidates.first()).map(|c| c.score)
                });
                (chosen.item_id.clone(), canonical, confidence)
            }
            None => {
                let selection = set
                    .map(select_rule_item)
                    .unwrap_or_else(|| {
                        select_rule_item(&order_contracts::types::LineCandidates {
                            line_index: line.line_index,
                            candidates: Vec::new(),
                        })
                    });
                if selection.below_threshold {
                    notes.push(DecisionNote::for_line(
                        "item_below_threshold",
                        line.line_index,
                    ));
                }
                (
                    selection.item_code,
                    selection.canonical_name,
                    Some(selection.confidence),
                )
            }
        };

        // Rule-extracted mods from the inline note, merged after LLM mods.
        let mut confidence_mods = llm_item.and_then(|i| clamp_confidence(i.confidence_mods));
        if let Some(note) = &line.note_raw {
            let extracted = extract_note_mods(note, ctx.allowed_mods);
            for m in extracted.mods {
                if !mods.iter().any(|seen| seen == &m) {
                    mods.push(m);
                }
            }
            invented_mod |= extracted.invented;
            if confidence_mods.is_none() {
                confidence_mods = Some(0.9);
            }
        }

        let sold_out = item_code
            .as_ref()
            .and_then(|id| ctx.menu.iter().find(|mi| &mi.item_id == id))
            .is_some_and(|mi| mi.sold_out);

        let low_confidence =
            confidence_item.is_some_and(|c| c < REVIEW_CONFIDENCE_THRESHOLD);
        let needs_review = item_code.is_none()
            || line.qty < 1
            || line.qty_unparsed
            || low_confidence
            || sold_out
            || invented_mod
            || llm_flag;

        let mut metadata = serde_json::Map::new();
        if sold_out {
            metadata.insert("sold_out".to_string(), Value::Bool(true));
        }
        if invented_mod {
            metadata.insert("unlisted_mod".to_string(), Value::Bool(true));
        }

        items.push(NormalizedItem {
            line_index: line.line_index,
            raw_line: line.raw_line.clone(),
            name_raw: line.name_raw.clone(),
            name_normalized: canonical_name.unwrap_or_else(|| line.name_raw.trim().to_string()),
            item_code,
            qty: line.qty,
            note_raw: line.note_raw.clone(),
            mods,
            group_id: None,
            confidence_item,
            confidence_mods,
            needs_review,
            metadata: Value::Object(metadata),
            version: ENTITY_VERSION,
        });
    }

    // ---- Groups ----------------------------------------------------------
    let item_indices: Vec<u32> = items.iter().map(|i| i.line_index).collect();
    let mut groups: Vec<Group> = Vec::new();

    let llm_groups = llm.map(|out| out.groups.as_slice()).unwrap_or_default();
    if !llm_groups.is_empty() {
        for raw in llm_groups {
            let mut members: Vec<u32> = Vec::new();
            for idx in &raw.line_indices {
                if item_indices.contains(idx) && !members.contains(idx) {
                    members.push(*idx);
                }
            }
            if members.len() < 2 {
                notes.push(DecisionNote::for_group("group_rejected", &raw.group_id));
                continue;
            }
            let group_type = match raw.group_type.as_str() {
                "pack_together" => GroupType::PackTogether,
                "separate" => GroupType::Separate,
                _ => GroupType::Other,
            };
            let label = raw.label.clone().unwrap_or_default();
            let confidence_group = clamp_confidence(raw.confidence_group);
            let needs_review = raw.needs_review
                || label.is_empty()
                || confidence_group.is_some_and(|c| c < REVIEW_CONFIDENCE_THRESHOLD);
            groups.push(Group {
                group_id: raw.group_id.clone(),
                group_type,
                label,
                line_indices: members,
                confidence_group,
                needs_review,
                metadata: empty_metadata(),
                version: ENTITY_VERSION,
            });
        }
    } else {
        // Rule hints: order-level notes first, then inline notes.
        let mut hints: Vec<(String, GroupHint, Option<u32>)> = Vec::new();
        for note in &parsed.order_notes {
            if let Some(hint) = detect_group_hint(&note.text) {
                hints.push((note.text.clone(), hint, note.after_line_index));
            }
        }
        for line in &parsed.lines {
            if let Some(note) = &line.note_raw {
                if let Some(hint) = detect_group_hint(note) {
                    hints.push((note.clone(), hint, None));
                }
            }
        }

        for (label, hint, after) in hints {
            let members: Vec<u32> = if hint.narrow_to_two {
                match after {
                    Some(last) if last >= 1 => vec![last - 1, last],
                    _ => Vec::new(),
                }
            } else {
                item_indices.clone()
            };
            let members: Vec<u32> = members
                .into_iter()
                .filter(|i| item_indices.contains(i))
                .collect();

            if members.len() < 2 {
                let mut note = DecisionNote::new("group_rejected");
                note.detail = Some(label.clone());
                notes.push(note);
                continue;
            }

            groups.push(Group {
                group_id: format!("g{}", groups.len() + 1),
                group_type: hint.group_type,
                label,
                line_indices: members,
                confidence_group: Some(0.9),
                needs_review: false,
                metadata: empty_metadata(),
                version: ENTITY_VERSION,
            });
        }
    }

    // Back-reference the first containing group on each item.
    for item in &mut items {
        item.group_id = groups
            .iter()
            .find(|g| g.line_indices.contains(&item.line_index))
            .map(|g| g.group_id.clone());
    }

    let mut order = NormalizedOrder {
        source_text: ctx.source_text.to_string(),
        order_id: ctx.order_id.to_string(),
        items,
        groups,
        lines: parsed.lines.clone(),
        audit_events: notes,
        overall_needs_review: false,
        metadata: empty_metadata(),
        version: ENTITY_VERSION,
    };
    order.overall_needs_review = order.compute_overall_needs_review();

    debug!(
        order_id = ctx.order_id,
        items = order.items.len(),
        groups = order.groups.len(),
        needs_review = order.overall_needs_review,
        "merge completed"
    );

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::generate;
    use crate::parser::parse_receipt;
    use llm_adapter::{LlmGroup, LlmItem};

    fn menu() -> Vec<MenuItem> {
        vec![
            MenuItem {
                item_id: "I001".into(),
                canonical_name: "招牌鍋貼".into(),
                aliases: vec![],
                sold_out: false,
            },
            MenuItem {
                item_id: "I002".into(),
                canonical_name: "酸辣湯".into(),
                aliases: vec![],
                sold_out: false,
            },
            MenuItem {
                item_id: "I003".into(),
                canonical_name: "咖哩鍋貼".into(),
                aliases: vec![],
                sold_out: false,
            },
        ]
    }

    fn ctx<'a>(
        source: &'a str,
        menu: &'a [MenuItem],
        mods: &'a [String],
        fallback: Option<&'a str>,
    ) -> MergeContext<'a> {
        MergeContext {
            order_id: "ord-test",
            source_text: source,
            menu,
            allowed_mods: mods,
            fallback_reason: fallback,
        }
    }

    #[test]
    fn high_confidence_lines_map_cleanly() {
        let source = "招牌鍋貼 x5\n酸辣湯 x1";
        let parsed = parse_receipt(source);
        let menu = menu();
        let cands = generate(&parsed.lines, &menu);
        let order = merge(&parsed, &cands, None, &ctx(source, &menu, &[], None));

        assert_eq!(order.items.len(), 2);
        assert!(order.items.iter().all(|i| i.item_code.is_some()));
        assert!(order.groups.is_empty());
        assert!(!order.overall_needs_review);
        assert_eq!(order.items[0].qty, 5);
    }

    #[test]
    fn unparseable_qty_flags_the_item() {
        let source = "咖哩鍋貼 xO";
        let parsed = parse_receipt(source);
        let menu = menu();
        let cands = generate(&parsed.lines, &menu);
        let order = merge(&parsed, &cands, None, &ctx(source, &menu, &[], None));

        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].qty, 1);
        assert!(order.items[0].needs_review);
        assert!(order.overall_needs_review);
    }

    #[test]
    fn standalone_note_builds_a_separate_group() {
        let source = "招牌鍋貼 x5\n咖哩鍋貼 x3\n備註:分裝";
        let parsed = parse_receipt(source);
        let menu = menu();
        let cands = generate(&parsed.lines, &menu);
        let order = merge(&parsed, &cands, None, &ctx(source, &menu, &[], None));

        assert_eq!(order.items.len(), 2);
        assert_eq!(order.groups.len(), 1);
        let group = &order.groups[0];
        assert_eq!(group.group_type, GroupType::Separate);
        assert_eq!(group.line_indices, vec![0, 1]);
        assert_eq!(group.label, "分裝");
        assert_eq!(order.items[0].group_id.as_deref(), Some(group.group_id.as_str()));
    }

    #[test]
    fn empty_receipt_is_flagged_with_a_single_note() {
        let parsed = parse_receipt("");
        let order = merge(&parsed, &[], None, &ctx("", &[], &[], None));
        assert!(order.items.is_empty());
        assert!(order.overall_needs_review);
        assert_eq!(order.audit_events.len(), 1);
        assert_eq!(order.audit_events[0].code, "no_items_detected");
    }

    #[test]
    fn fallback_reason_lands_in_the_decision_notes() {
        let source = "招牌鍋貼 x5";
        let parsed = parse_receipt(source);
        let menu = menu();
        let cands = generate(&parsed.lines, &menu);
        let order = merge(
            &parsed,
            &cands,
            None,
            &ctx(source, &menu, &[], Some("llm_timeout")),
        );
        let note = order
            .audit_events
            .iter()
            .find(|n| n.code == "llm_fallback")
            .unwrap();
        assert_eq!(note.detail.as_deref(), Some("llm_timeout"));
    }

    #[test]
    fn note_mods_split_on_conjunctions_and_inherit_negation() {
        let allowed = vec!["不加薑絲".to_string(), "不加香菜".to_string(), "加辣".to_string()];
        let out = extract_note_mods("不要加薑絲跟香菜", &allowed);
        assert_eq!(out.mods, vec!["不加薑絲", "不加香菜"]);
        assert!(!out.invented);

        let out = extract_note_mods("加辣", &allowed);
        assert_eq!(out.mods, vec!["加辣"]);

        let out = extract_note_mods("加起司", &allowed);
        assert!(out.mods.is_empty());
        assert!(out.invented);
    }

    #[test]
    fn unlisted_mod_flags_the_item() {
        let source = "招牌鍋貼 x5 備註:加起司";
        let parsed = parse_receipt(source);
        let menu = menu();
        let cands = generate(&parsed.lines, &menu);
        let allowed = vec!["加辣".to_string()];
        let order = merge(&parsed, &cands, None, &ctx(source, &menu, &allowed, None));

        assert!(order.items[0].mods.is_empty());
        assert!(order.items[0].needs_review);
        assert_eq!(order.items[0].metadata["unlisted_mod"], true);
    }

    #[test]
    fn llm_output_wins_over_rule_selection() {
        let source = "招牌鍋貼 x5\n咖哩鍋貼 x3";
        let parsed = parse_receipt(source);
        let menu = menu();
        let cands = generate(&parsed.lines, &menu);
        let allowed = vec!["加辣".to_string()];
        let llm = StructuredOutput {
            items: vec![
                LlmItem {
                    line_index: 0,
                    item_id: Some("I001".into()),
                    mods: vec!["加辣".into()],
                    confidence_item: Some(0.97),
                    confidence_mods: Some(0.92),
                    needs_review: false,
                },
                LlmItem {
                    line_index: 1,
                    item_id: Some("I003".into()),
                    mods: vec![],
                    confidence_item: Some(0.94),
                    confidence_mods: None,
                    needs_review: false,
                },
            ],
            groups: vec![LlmGroup {
                group_id: "llm-g1".into(),
                group_type: "pack_together".into(),
                label: Some("同袋".into()),
                line_indices: vec![0, 1],
                confidence_group: Some(0.9),
                needs_review: false,
            }],
        };
        let order = merge(&parsed, &cands, Some(&llm), &ctx(source, &menu, &allowed, None));

        assert_eq!(order.items[0].mods, vec!["加辣"]);
        assert_eq!(order.items[0].confidence_item, Some(0.97));
        assert_eq!(order.groups.len(), 1);
        assert_eq!(order.groups[0].group_id, "llm-g1");
        assert!(!order.overall_needs_review);
    }

    #[test]
    fn llm_group_with_missing_member_is_rejected() {
        let source = "招牌鍋貼 x5";
        let parsed = parse_receipt(source);
        let menu = menu();
        let cands = generate(&parsed.lines, &menu);
        let llm = StructuredOutput {
            items: vec![LlmItem {
                line_index: 0,
                item_id: Some("I001".into()),
                mods: vec![],
                confidence_item: Some(0.95),
                confidence_mods: None,
                needs_review: false,
            }],
            groups: vec![LlmGroup {
                group_id: "g-bad".into(),
                group_type: "separate".into(),
                label: Some("分裝".into()),
                line_indices: vec![0, 7],
                confidence_group: Some(0.9),
                needs_review: false,
            }],
        };
        let order = merge(&parsed, &cands, Some(&llm), &ctx(source, &menu, &[], None));
        assert!(order.groups.is_empty());
        assert!(order
            .audit_events
            .iter()
            .any(|n| n.code == "group_rejected" && n.group_id.as_deref() == Some("g-bad")));
    }

    #[test]
    fn sold_out_item_forces_review() {
        let menu = vec![MenuItem {
            item_id: "I001".into(),
            canonical_name: "招牌鍋貼".into(),
            aliases: vec![],
            sold_out: true,
        }];
        let source = "招牌鍋貼 x2";
        let parsed = parse_receipt(source);
        let cands = generate(&parsed.lines, &menu);
        let order = merge(&parsed, &cands, None, &ctx(source, &menu, &[], None));
        assert!(order.items[0].needs_review);
        assert_eq!(order.items[0].metadata["sold_out"], true);
    }

    #[test]
    fn weak_candidate_leaves_item_unmapped() {
        let menu = menu();
        let source = "鍋貼類的東西 x1";
        let parsed = parse_receipt(source);
        let cands = generate(&parsed.lines, &menu);
        let order = merge(&parsed, &cands, None, &ctx(source, &menu, &[], None));
        assert!(order.items[0].item_code.is_none());
        assert!(order.overall_needs_review);
    }
}
