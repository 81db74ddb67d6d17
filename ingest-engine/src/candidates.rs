//! Candidate generator.
//!
//! Ranks menu items per raw line by string similarity against the
//! canonical name and every alias: exact normalized match first, then
//! substring containment, then normalized edit distance. Top five
//! survive; ties keep catalog order.

use strsim::normalized_levenshtein;

use order_contracts::types::{Candidate, LineCandidates, RawLine};
use store_config::model::MenuItem;

/// Candidates below this similarity are noise and dropped outright.
const MIN_SCORE: f64 = 0.3;
/// Keep at most this many candidates per line.
const TOP_K: usize = 5;

/// Normalization used on both sides of every comparison.
pub fn normalize_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

fn similarity(query: &str, target: &str) -> f64 {
    if query.is_empty() || target.is_empty() {
        return 0.0;
    }
    if query == target {
        return 1.0;
    }
    if query.contains(target) || target.contains(query) {
        let (short, long) = if query.len() <= target.len() {
            (query, target)
        } else {
            (target, query)
        };
        let ratio = short.chars().count() as f64 / long.chars().count() as f64;
        return 0.86 + 0.14 * ratio;
    }
    normalized_levenshtein(query, target)
}

fn best_score(name: &str, item: &MenuItem) -> f64 {
    let mut score = similarity(name, &normalize_name(&item.canonical_name));
    for alias in &item.aliases {
        score = score.max(similarity(name, &normalize_name(alias)));
    }
    score
}

/// Ranks catalog candidates for one raw line.
pub fn candidates_for_line(line: &RawLine, menu: &[MenuItem]) -> LineCandidates {
    let query = normalize_name(&line.name_raw);

    let mut scored: Vec<(usize, Candidate)> = menu
        .iter()
        .enumerate()
        .map(|(pos, item)| {
            (
                pos,
                Candidate {
                    item_id: item.item_id.clone(),
                    canonical_name: item.canonical_name.clone(),
                    score: best_score(&query, item),
                },
            )
        })
        .filter(|(_, c)| c.score >= MIN_SCORE)
        .collect();

    // Score descending, catalog position as the stable tie-break.
    scored.sort_by(|(pa, a), (pb, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(pa.cmp(pb))
    });
    scored.truncate(TOP_K);

    LineCandidates {
        line_index: line.line_index,
        candidates: scored.into_iter().map(|(_, c)| c).collect(),
    }
}

/// Ranks candidates for every line. An empty catalog produces empty
/// candidate lists; every such line needs review downstream.
pub fn generate(lines: &[RawLine], menu: &[MenuItem]) -> Vec<LineCandidates> {
    lines
        .iter()
        .map(|line| candidates_for_line(line, menu))
        .collect()
}
