//! Built-in test receipts for the fixtures endpoint and the test-suite
//! runner. The catalog/mods pair keeps suite runs deterministic whatever
//! the store on disk looks like.

use serde_json::{Value, json};

/// One canned receipt with its expected outcome.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestFixture {
    pub name: &'static str,
    pub scenario: &'static str,
    pub source_text: &'static str,
    pub expect_needs_review: bool,
}

/// The canned receipts.
pub fn builtin_fixtures() -> Vec<IngestFixture> {
    vec![
        IngestFixture {
            name: "happy_path_two_items",
            scenario: "happy",
            source_text: "招牌鍋貼 x5\n酸辣湯 x1",
            expect_needs_review: false,
        },
        IngestFixture {
            name: "unparseable_quantity",
            scenario: "dirty",
            source_text: "咖哩鍋貼 xO",
            expect_needs_review: true,
        },
        IngestFixture {
            name: "split_packaging_note",
            scenario: "groups",
            source_text: "招牌鍋貼 x5\n咖哩鍋貼 x3\n備註:分裝",
            expect_needs_review: false,
        },
        IngestFixture {
            name: "same_bag_inline_note",
            scenario: "groups",
            source_text: "招牌鍋貼 x5\n韭菜鍋貼 x10 備註:同袋",
            expect_needs_review: false,
        },
        IngestFixture {
            name: "spicy_mod_note",
            scenario: "mods",
            source_text: "招牌鍋貼 x5 備註:加辣",
            expect_needs_review: false,
        },
        IngestFixture {
            name: "negated_mods_note",
            scenario: "mods",
            source_text: "牛肉麵 x1 備註:不要加薑絲跟香菜",
            expect_needs_review: false,
        },
        IngestFixture {
            name: "unknown_item",
            scenario: "dirty",
            source_text: "神秘料理 x1",
            expect_needs_review: true,
        },
        IngestFixture {
            name: "empty_receipt",
            scenario: "dirty",
            source_text: "",
            expect_needs_review: true,
        },
    ]
}

/// Catalog used for suite runs (inline override).
pub fn fixture_menu_catalog() -> Value {
    json!([
        {"item_id": "I001", "canonical_name": "招牌鍋貼", "aliases": ["鍋貼"]},
        {"item_id": "I002", "canonical_name": "酸辣湯"},
        {"item_id": "I003", "canonical_name": "咖哩鍋貼"},
        {"item_id": "I004", "canonical_name": "韭菜鍋貼"},
        {"item_id": "I005", "canonical_name": "牛肉麵"}
    ])
}

/// Allowed mods used for suite runs (inline override).
pub fn fixture_allowed_mods() -> Value {
    json!(["加辣", "不加薑絲", "不加香菜", "不加蔥"])
}

/// Extra noise appended when `inject_dirty` is requested.
pub const DIRTY_SUFFIX: &str = "\n謎樣品項 x?\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixtures_are_named_uniquely() {
        let fixtures = builtin_fixtures();
        let mut names: Vec<&str> = fixtures.iter().map(|f| f.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), fixtures.len());
    }

    #[test]
    fn fixture_catalog_covers_fixture_receipts() {
        let catalog = fixture_menu_catalog();
        let names: Vec<&str> = catalog
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["canonical_name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"招牌鍋貼"));
        assert!(names.contains(&"牛肉麵"));
    }
}
