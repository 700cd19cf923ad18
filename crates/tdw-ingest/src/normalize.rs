//! Response payload normalization
//!
//! APIs return either a list of entities or a single aggregate object at the
//! response path. Both are turned into a sequence of [`Record`]s here.

use crate::record::Record;
use serde_json::Value;

/// Separator between a parent key and its child when flattening
pub const FLATTEN_SEPARATOR: &str = "_";

/// Convert a raw payload into records.
///
/// - array: one record per element, objects unchanged
/// - object: a single record with nested keys joined as `parent_child`
/// - anything else (null, scalar): no records
///
/// An empty object carries no data and yields no records.
pub fn normalize(raw: &Value) -> Vec<Record> {
    match raw {
        Value::Array(items) => items.iter().map(element_record).collect(),
        Value::Object(map) if map.is_empty() => Vec::new(),
        Value::Object(_) => vec![flatten(raw)],
        _ => Vec::new(),
    }
}

fn element_record(item: &Value) -> Record {
    match item {
        Value::Object(map) => map.clone(),
        other => flatten(other),
    }
}

/// Flatten nested objects into one level of `parent_child` keys.
///
/// Arrays are leaves. A bare scalar becomes the value of the empty key.
pub fn flatten(value: &Value) -> Record {
    let mut out = Record::new();
    flatten_into(value, "", &mut out);
    out
}

fn flatten_into(value: &Value, prefix: &str, out: &mut Record) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}{}{}", prefix, FLATTEN_SEPARATOR, key)
                };
                flatten_into(child, &key, out);
            }
        },
        leaf => {
            out.insert(prefix.to_string(), leaf.clone());
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(value: Value) -> Vec<Record> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect()
    }

    #[test]
    fn test_array_elements_pass_through() {
        assert_eq!(normalize(&json!([{"a": 1}])), records(json!([{"a": 1}])));
    }

    #[test]
    fn test_array_elements_are_not_flattened() {
        let raw = json!([{"a": {"b": 1}}, {"c": [1, 2]}]);
        assert_eq!(normalize(&raw), records(raw.clone()));
    }

    #[test]
    fn test_object_is_flattened_into_one_record() {
        assert_eq!(normalize(&json!({"a": {"b": 1}})), records(json!([{"a_b": 1}])));
    }

    #[test]
    fn test_deep_flatten_keeps_arrays_as_leaves() {
        let raw = json!({
            "summary": {"price": {"raw": 1.5, "fmt": "1.50"}, "tags": ["x"]},
            "symbol": "AAPL"
        });
        assert_eq!(
            normalize(&raw),
            records(json!([{
                "summary_price_raw": 1.5,
                "summary_price_fmt": "1.50",
                "summary_tags": ["x"],
                "symbol": "AAPL"
            }]))
        );
    }

    #[test]
    fn test_null_and_scalars_are_empty() {
        assert!(normalize(&Value::Null).is_empty());
        assert!(normalize(&json!(3)).is_empty());
        assert!(normalize(&json!("text")).is_empty());
        assert!(normalize(&json!({})).is_empty());
        assert!(normalize(&json!([])).is_empty());
    }

    #[test]
    fn test_scalar_elements_use_empty_key() {
        assert_eq!(normalize(&json!(["AAPL"])), records(json!([{"": "AAPL"}])));
    }
}
