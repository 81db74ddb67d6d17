//! Sensitive-value masking applied to every record before it is written.

use regex::Regex;
use serde_json::Value;

const MASK: &str = "***";

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    matches!(
        key.as_str(),
        "password" | "token" | "api_key" | "authorization" | "cookie" | "phone" | "mobile"
            | "email"
    ) || key.contains("token")
        || key.contains("secret")
}

fn looks_like_email(s: &str) -> bool {
    let re = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    re.is_match(s)
}

/// Long mixed alphanumerics read as credentials: at least 16 chars, all
/// alphanumeric, containing both a letter and a digit.
fn looks_like_credential(s: &str) -> bool {
    s.len() >= 16
        && s.chars().all(|c| c.is_ascii_alphanumeric())
        && s.chars().any(|c| c.is_ascii_alphabetic())
        && s.chars().any(|c| c.is_ascii_digit())
}

/// Recursively masks sensitive keys and credential-looking string values.
pub fn mask_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if is_sensitive_key(key) {
                    *val = Value::String(MASK.to_string());
                } else {
                    mask_value(val);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                mask_value(item);
            }
        }
        Value::String(s) => {
            if looks_like_email(s) || looks_like_credential(s) {
                *value = Value::String(MASK.to_string());
            }
        }
        _ => {}
    }
}
