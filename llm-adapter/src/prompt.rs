//! Normalization prompt builder.
//!
//! Produces a system (contract) + user (order data) message pair. The
//! contract pins the reply to a single JSON object matching the
//! structured-output schema, with item ids restricted to the listed
//! candidates and mods restricted to the store's allowed list.

use order_contracts::types::{LineCandidates, RawLine};

/// Final prompt sent to the completion service.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Assembles the normalization prompt for one receipt.
pub fn build_normalize_prompt(
    lines: &[RawLine],
    candidates: &[LineCandidates],
    allowed_mods: &[String],
) -> Prompt {
    let system = r#"You normalize point-of-sale receipt lines against a menu catalog.
Reply with ONE JSON object and nothing else. Schema:
{"items": [{"line_index": int, "item_id": string|null, "mods": [string],
            "confidence_item": number, "confidence_mods": number,
            "needs_review": bool}],
 "groups": [{"group_id": string, "type": "pack_together"|"separate"|"other",
             "label": string, "line_indices": [int],
             "confidence_group": number, "needs_review": bool}]}
Rules:
- Every input line_index appears exactly once in items.
- item_id must be one of that line's candidate ids; use null when none fits.
- mods may only contain entries from the ALLOWED MODS list; when a note
  asks for anything else, leave it out and set needs_review to true.
- Emit a group only when a note clearly asks for cross-line handling
  (same bag, split packaging); groups need at least two line_indices.
- Confidences are numbers in [0, 1]."#
        .to_string();

    let mut user = String::from("# Receipt lines\n");
    for line in lines {
        user.push_str(&format!(
            "#{} raw: {} | name: {} | qty: {}",
            line.line_index, line.raw_line, line.name_raw, line.qty
        ));
        if let Some(note) = &line.note_raw {
            user.push_str(&format!(" | note: {note}"));
        }
        user.push('\n');
    }

    user.push_str("\n# Candidates per line\n");
    for line in lines {
        let set = candidates.iter().find(|c| c.line_index == line.line_index);
        match set.filter(|s| !s.candidates.is_empty()) {
            Some(set) => {
                user.push_str(&format!("#{}:\n", line.line_index));
                for cand in &set.candidates {
                    user.push_str(&format!(
                        "  - {} {} (score {:.2})\n",
                        cand.item_id, cand.canonical_name, cand.score
                    ));
                }
            }
            None => {
                user.push_str(&format!("#{}: (no candidates)\n", line.line_index));
            }
        }
    }

    user.push_str("\n# ALLOWED MODS\n");
    if allowed_mods.is_empty() {
        user.push_str("(none)\n");
    } else {
        for m in allowed_mods {
            user.push_str(&format!("- {m}\n"));
        }
    }

    Prompt { system, user }
}

#[cfg(test)]
mod tests {
    use super::*;
    use order_contracts::types::Candidate;

    #[test]
    fn prompt_lists_lines_candidates_and_mods() {
        let lines = vec![RawLine {
            line_index: 0,
            raw_line: "招牌鍋貼 x5 備註:加辣".into(),
            name_raw: "招牌鍋貼".into(),
            qty: 5,
            note_raw: Some("加辣".into()),
            qty_unparsed: false,
        }];
        let candidates = vec![LineCandidates {
            line_index: 0,
            candidates: vec![Candidate {
                item_id: "I001".into(),
                canonical_name: "招牌鍋貼".into(),
                score: 1.0,
            }],
        }];
        let mods = vec!["加辣".to_string(), "不加香菜".to_string()];

        let prompt = build_normalize_prompt(&lines, &candidates, &mods);
        assert!(prompt.system.contains("exactly once"));
        assert!(prompt.user.contains("note: 加辣"));
        assert!(prompt.user.contains("I001"));
        assert!(prompt.user.contains("- 不加香菜"));
    }

    #[test]
    fn empty_candidate_set_is_called_out() {
        let lines = vec![RawLine {
            line_index: 0,
            raw_line: "謎之料理".into(),
            name_raw: "謎之料理".into(),
            qty: 1,
            note_raw: None,
            qty_unparsed: false,
        }];
        let prompt = build_normalize_prompt(&lines, &[], &[]);
        assert!(prompt.user.contains("(no candidates)"));
        assert!(prompt.user.contains("(none)"));
    }
}
