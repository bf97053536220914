//! Text extraction from provider result items.
//!
//! Result items are flattened into `a__b__0__c` paths. Every non-empty string
//! leaf whose path contains one of the fields of interest contributes its text.

use serde_json::Value;

pub const KEY_DELIMITER: &str = "__";

/// Flatten nested objects and arrays into `(path, string leaf)` pairs, in document order.
pub fn flatten_strings(value: &Value) -> Vec<(String, &str)> {
    let mut out = Vec::new();
    walk(value, String::new(), &mut out);
    out
}

fn child(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}{KEY_DELIMITER}{segment}")
    }
}

fn walk<'a>(value: &'a Value, prefix: String, out: &mut Vec<(String, &'a str)>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                walk(v, child(&prefix, k), out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                walk(v, child(&prefix, &i.to_string()), out);
            }
        }
        Value::String(s) => out.push((prefix, s.as_str())),
        _ => {}
    }
}

/// Extract `(fields, text)` from `items`.
///
/// `fields` lists each contributing leaf name once, in first-seen order.
/// `text` joins the contributing values with single spaces.
pub fn extract_text(items: &Value, fields_of_interest: &[&str]) -> (Vec<String>, String) {
    let mut fields: Vec<String> = Vec::new();
    let mut parts: Vec<&str> = Vec::new();
    for (path, text) in flatten_strings(items) {
        if text.is_empty() || !fields_of_interest.iter().any(|f| path.contains(f)) {
            continue;
        }
        parts.push(text);
        let leaf = path.rsplit(KEY_DELIMITER).next().unwrap_or(&path);
        if !fields.iter().any(|f| f == leaf) {
            fields.push(leaf.to_string());
        }
    }
    (fields, parts.join(" "))
}

/// Follow a path of object keys, e.g. `["webPages", "value"]`.
pub fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(key))
}
