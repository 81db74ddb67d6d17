//! Delimited wire-format parser.
//!
//! Payload shape: `header#count#record1#record2#…#tail`. Each record is
//! `^`-separated; the documented field indices are:
//! `[1]` item_name, `[2]` printed_at, `[3]` qty, `[4]` table_code
//! (`0` takeout, `-1` call, `-2` delivery, `-3` dine-in, else Nth table),
//! `[5]` display_order_no, `[6]` order_no (grouping key), `[7]` serial_no,
//! `[9]` seq, `[10]` note_raw, `[11]` selected_raw (kept for audit only).

use serde::Serialize;
use serde_json::json;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::warn;

use services::canonical::canonical_json;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("payload too short to carry a header and a count")]
    MalformedPayload,
}

/// One raw record, field-for-field.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LegacyRecord {
    pub item_name: String,
    pub printed_at: String,
    pub qty: i64,
    pub table_code: String,
    pub display_order_no: String,
    pub order_no: String,
    pub serial_no: String,
    pub seq: i64,
    pub note_raw: String,
    /// Parsed but never interpreted; retained for the audit trail.
    pub selected_raw: String,
}

/// One reassembled order, ready for ingest.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LegacyOrder {
    pub order_no: String,
    pub display_order_no: String,
    pub table_label: String,
    pub source_text: String,
    pub serial_nos: Vec<String>,
    pub line_count: usize,
    pub records: Vec<LegacyRecord>,
}

impl LegacyOrder {
    /// Content fingerprint used by the dedupe window.
    pub fn fingerprint(&self) -> String {
        let key = canonical_json(&json!({
            "order_no": self.order_no,
            "serial_nos": self.serial_nos,
            "source_text": self.source_text,
            "line_count": self.line_count,
        }));
        let mut hasher = Sha1::new();
        hasher.update(key.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Maps a table code to its label.
fn table_label(code: &str) -> String {
    match code.trim().parse::<i64>() {
        Ok(0) => "takeout".to_string(),
        Ok(-1) => "call".to_string(),
        Ok(-2) => "delivery".to_string(),
        Ok(-3) => "dine_in".to_string(),
        Ok(n) if n > 0 => format!("{n}th-table"),
        _ => code.trim().to_string(),
    }
}

fn parse_record(segment: &str) -> Option<LegacyRecord> {
    let fields: Vec<&str> = segment.split('^').collect();
    let field = |i: usize| fields.get(i).copied().unwrap_or("").trim().to_string();

    let item_name = field(1);
    if item_name.is_empty() {
        return None;
    }

    Some(LegacyRecord {
        item_name,
        printed_at: field(2),
        qty: field(3).parse().unwrap_or(1).max(1),
        table_code: field(4),
        display_order_no: field(5),
        order_no: field(6),
        serial_no: field(7),
        seq: field(9).parse().unwrap_or(i64::MAX),
        note_raw: field(10),
        selected_raw: field(11),
    })
}

/// Renders one record as a receipt line.
fn record_line(record: &LegacyRecord) -> String {
    if record.note_raw.is_empty() {
        format!("{} x{}", record.item_name, record.qty)
    } else {
        format!("{} x{} 備註:{}", record.item_name, record.qty, record.note_raw)
    }
}

/// Parses one wire payload into orders, grouped by `order_no`.
///
/// Records inside a group sort by `seq` then input position; duplicate
/// rendered lines collapse (exact match).
pub fn parse_legacy_payload(payload: &str) -> Result<Vec<LegacyOrder>, WireError> {
    let segments: Vec<&str> = payload.trim().split('#').collect();
    if segments.len() < 2 {
        return Err(WireError::MalformedPayload);
    }

    let declared: Option<usize> = segments[1].trim().parse().ok();
    let records: Vec<(usize, LegacyRecord)> = segments[2..]
        .iter()
        .filter(|s| s.contains('^'))
        .filter_map(|s| parse_record(s))
        .enumerate()
        .collect();

    if let Some(declared) = declared {
        if declared != records.len() {
            warn!(
                declared,
                parsed = records.len(),
                "record count mismatch in legacy payload"
            );
        }
    }

    // Group by order_no, keeping first-seen group order.
    let mut order_keys: Vec<String> = Vec::new();
    for (_, record) in &records {
        if !order_keys.iter().any(|k| k == &record.order_no) {
            order_keys.push(record.order_no.clone());
        }
    }

    let mut orders = Vec::with_capacity(order_keys.len());
    for key in order_keys {
        let mut group: Vec<(usize, LegacyRecord)> = records
            .iter()
            .filter(|(_, r)| r.order_no == key)
            .cloned()
            .collect();
        group.sort_by(|(pa, a), (pb, b)| a.seq.cmp(&b.seq).then(pa.cmp(pb)));

        let group_records: Vec<LegacyRecord> = group.into_iter().map(|(_, r)| r).collect();

        let mut lines: Vec<String> = Vec::new();
        for record in &group_records {
            let line = record_line(record);
            if !lines.contains(&line) {
                lines.push(line);
            }
        }

        let serial_nos: Vec<String> = group_records
            .iter()
            .map(|r| r.serial_no.clone())
            .filter(|s| !s.is_empty())
            .collect();

        let first = &group_records[0];
        orders.push(LegacyOrder {
            order_no: key,
            display_order_no: first.display_order_no.clone(),
            table_label: table_label(&first.table_code),
            source_text: lines.join("\n"),
            line_count: lines.len(),
            serial_nos,
            records: group_records,
        });
    }

    Ok(orders)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = "ok#2#0^招牌鍋貼^2026-02-15 10:00:00^5^0^012^ORD-A^SER-1^^1^^#0^韭菜鍋貼^2026-02-15 10:00:01^10^0^012^ORD-A^SER-2^^2^同袋^";

    #[test]
    fn reassembles_one_order_with_notes() {
        let orders = parse_legacy_payload(PAYLOAD).unwrap();
        assert_eq!(orders.len(), 1);
        let order = &orders[0];
        assert_eq!(order.order_no, "ORD-A");
        assert_eq!(order.display_order_no, "012");
        assert_eq!(order.table_label, "takeout");
        assert!(order.source_text.contains("招牌鍋貼 x5"));
        assert!(order.source_text.contains("韭菜鍋貼 x10 備註:同袋"));
        assert_eq!(order.serial_nos, vec!["SER-1", "SER-2"]);
        assert_eq!(order.line_count, 2);
    }

    #[test]
    fn records_sort_by_seq_not_input_position() {
        let payload = "ok#2#0^後到的^t^1^0^1^O^S2^^9^^#0^先到的^t^1^0^1^O^S1^^1^^";
        let orders = parse_legacy_payload(payload).unwrap();
        let lines: Vec<&str> = orders[0].source_text.lines().collect();
        assert_eq!(lines, vec!["先到的 x1", "後到的 x1"]);
    }

    #[test]
    fn exact_duplicate_lines_collapse() {
        let payload = "ok#2#0^酸辣湯^t^1^0^1^O^S1^^1^^#0^酸辣湯^t^1^0^1^O^S2^^2^^";
        let orders = parse_legacy_payload(payload).unwrap();
        assert_eq!(orders[0].line_count, 1);
        assert_eq!(orders[0].source_text, "酸辣湯 x1");
    }

    #[test]
    fn orders_split_on_order_no() {
        let payload = "ok#2#0^甲^t^1^0^1^O1^S1^^1^^#0^乙^t^1^0^2^O2^S2^^1^^";
        let orders = parse_legacy_payload(payload).unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].order_no, "O1");
        assert_eq!(orders[1].order_no, "O2");
    }

    #[test]
    fn table_codes_map_to_labels() {
        assert_eq!(table_label("0"), "takeout");
        assert_eq!(table_label("-1"), "call");
        assert_eq!(table_label("-2"), "delivery");
        assert_eq!(table_label("-3"), "dine_in");
        assert_eq!(table_label("5"), "5th-table");
        assert_eq!(table_label("booth"), "booth");
    }

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let orders = parse_legacy_payload(PAYLOAD).unwrap();
        let again = parse_legacy_payload(PAYLOAD).unwrap();
        assert_eq!(orders[0].fingerprint(), again[0].fingerprint());

        let other = parse_legacy_payload(
            "ok#1#0^招牌鍋貼^t^5^0^012^ORD-A^SER-1^^1^^",
        )
        .unwrap();
        assert_ne!(orders[0].fingerprint(), other[0].fingerprint());
    }

    #[test]
    fn selected_raw_is_carried_but_unused() {
        let payload = "ok#1#0^甲^t^1^0^1^O1^S1^^1^note^RAW-FLAG";
        let orders = parse_legacy_payload(payload).unwrap();
        assert_eq!(orders[0].records[0].selected_raw, "RAW-FLAG");
        assert!(!orders[0].source_text.contains("RAW-FLAG"));
    }

    #[test]
    fn garbage_payload_is_rejected() {
        assert!(parse_legacy_payload("no delimiters here").is_err());
        // Header + count with zero records parses to an empty set.
        assert!(parse_legacy_payload("ok#0#").unwrap().is_empty());
    }
}
