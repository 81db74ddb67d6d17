//! Receipt text parser.
//!
//! Splits raw text into item lines and order-level notes. Quantity
//! extraction tries, in order: `<name> x<int>` / `<name>*<int>` (also the
//! full-width `×`), then `<name> <int>份`. A quantity token that is
//! present but unparseable yields `qty = 1` with `qty_unparsed` set, which
//! downstream turns into a review flag.

use regex::Regex;

use order_contracts::types::RawLine;

/// Note markers as printed by upstream POS units (half/full-width colon).
const NOTE_MARKERS: &[&str] = &["備註:", "備註："];

/// A standalone `備註:` line; applies to the items above it.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderNote {
    pub text: String,
    /// Index of the last item line seen before this note, if any.
    pub after_line_index: Option<u32>,
}

/// Parser output: dense item lines plus order-level notes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedReceipt {
    pub lines: Vec<RawLine>,
    pub order_notes: Vec<OrderNote>,
}

fn split_note(line: &str) -> (&str, Option<&str>) {
    for marker in NOTE_MARKERS {
        if let Some(pos) = line.find(marker) {
            let (head, tail) = line.split_at(pos);
            return (head.trim_end(), Some(tail[marker.len()..].trim()));
        }
    }
    (line, None)
}

struct QtyParse {
    name: String,
    qty: i64,
    qty_unparsed: bool,
}

fn parse_qty(text: &str) -> QtyParse {
    // `<name> x5`, `<name>*5`, `<name>×5` (digits, no separator required).
    let marker_digits = Regex::new(r"^(?P<name>.+?)\s*[xX*×](?P<qty>\d+)$").unwrap();
    // `<name> xO` and friends: a marker is clearly there, digits are not.
    let marker_loose = Regex::new(r"^(?P<name>.+?)\s+[xX*×](?P<qty>\S+)$").unwrap();
    // `<name> 5份`.
    let fen_digits = Regex::new(r"^(?P<name>.+?)\s*(?P<qty>\d+)\s*份$").unwrap();
    let fen_loose = Regex::new(r"^(?P<name>.+?)\s+(?P<qty>\S+?)\s*份$").unwrap();

    for re in [&marker_digits, &fen_digits] {
        if let Some(caps) = re.captures(text) {
            let qty: i64 = caps["qty"].parse().unwrap_or(1);
            return QtyParse {
                name: caps["name"].trim().to_string(),
                qty: qty.max(1),
                qty_unparsed: false,
            };
        }
    }

    for re in [&marker_loose, &fen_loose] {
        if let Some(caps) = re.captures(text) {
            return QtyParse {
                name: caps["name"].trim().to_string(),
                qty: 1,
                qty_unparsed: true,
            };
        }
    }

    QtyParse {
        name: text.trim().to_string(),
        qty: 1,
        qty_unparsed: false,
    }
}

/// Parses one receipt into item lines and order notes.
pub fn parse_receipt(source: &str) -> ParsedReceipt {
    let mut parsed = ParsedReceipt::default();

    for raw in source.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        // A line that is nothing but a note belongs to the order, not to
        // an item.
        if let Some(note) = NOTE_MARKERS
            .iter()
            .find_map(|m| line.strip_prefix(m))
        {
            let note = note.trim();
            if !note.is_empty() {
                parsed.order_notes.push(OrderNote {
                    text: note.to_string(),
                    after_line_index: parsed
                        .lines
                        .last()
                        .map(|l| l.line_index),
                });
            }
            continue;
        }

        let (head, note_raw) = split_note(line);
        let QtyParse {
            name,
            qty,
            qty_unparsed,
        } = parse_qty(head);

        if name.is_empty() {
            continue;
        }

        let line_index = parsed.lines.len() as u32;
        parsed.lines.push(RawLine {
            line_index,
            raw_line: line.to_string(),
            name_raw: name,
            qty,
            note_raw: note_raw.filter(|n| !n.is_empty()).map(str::to_string),
            qty_unparsed,
        });
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lines_and_extracts_quantities() {
        let parsed = parse_receipt("招牌鍋貼 x5\n酸辣湯 x1\n\n小米粥*2\n蛋餅 3份");
        assert_eq!(parsed.lines.len(), 4);
        assert_eq!(parsed.lines[0].name_raw, "招牌鍋貼");
        assert_eq!(parsed.lines[0].qty, 5);
        assert_eq!(parsed.lines[2].qty, 2);
        assert_eq!(parsed.lines[3].name_raw, "蛋餅");
        assert_eq!(parsed.lines[3].qty, 3);
        assert!(parsed.lines.iter().all(|l| !l.qty_unparsed));
        // Dense 0-based indices.
        let indices: Vec<u32> = parsed.lines.iter().map(|l| l.line_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn unparseable_qty_defaults_to_one_and_flags() {
        let parsed = parse_receipt("咖哩鍋貼 xO");
        assert_eq!(parsed.lines.len(), 1);
        assert_eq!(parsed.lines[0].qty, 1);
        assert!(parsed.lines[0].qty_unparsed);
        assert_eq!(parsed.lines[0].name_raw, "咖哩鍋貼");
    }

    #[test]
    fn plain_name_is_qty_one_without_flag() {
        let parsed = parse_receipt("酸辣湯");
        assert_eq!(parsed.lines[0].qty, 1);
        assert!(!parsed.lines[0].qty_unparsed);
    }

    #[test]
    fn inline_note_is_attached_to_the_line() {
        let parsed = parse_receipt("韭菜鍋貼 x10 備註:同袋");
        assert_eq!(parsed.lines[0].qty, 10);
        assert_eq!(parsed.lines[0].note_raw.as_deref(), Some("同袋"));
        assert!(parsed.order_notes.is_empty());
    }

    #[test]
    fn standalone_note_line_is_an_order_note() {
        let parsed = parse_receipt("招牌鍋貼 x5\n咖哩鍋貼 x3\n備註:分裝");
        assert_eq!(parsed.lines.len(), 2);
        assert_eq!(parsed.order_notes.len(), 1);
        assert_eq!(parsed.order_notes[0].text, "分裝");
        assert_eq!(parsed.order_notes[0].after_line_index, Some(1));
    }

    #[test]
    fn full_width_colon_marker_is_recognized() {
        let parsed = parse_receipt("招牌鍋貼 x5 備註：不要辣");
        assert_eq!(parsed.lines[0].note_raw.as_deref(), Some("不要辣"));
    }

    #[test]
    fn empty_source_parses_to_nothing() {
        assert_eq!(parse_receipt("").lines.len(), 0);
        assert_eq!(parse_receipt("  \n \r\n ").lines.len(), 0);
    }
}
