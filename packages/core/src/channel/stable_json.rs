//! Stable JSON Stringification
//!
//! Channel names embed a JSON serialization of the view's routing params.
//! Publisher and subscriber must produce byte-identical names, so the
//! serialization sorts object keys lexicographically at every depth. Arrays
//! keep their order; scalars use the compact serde_json rendering.

use serde_json::Value;

/// Serialize a JSON value with lexicographically sorted object keys.
pub fn stable_stringify(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let entries: Vec<String> = keys
                .into_iter()
                .map(|key| {
                    format!(
                        "{}:{}",
                        Value::String(key.clone()),
                        stable_stringify(&map[key])
                    )
                })
                .collect();
            format!("{{{}}}", entries.join(","))
        }
        Value::Array(items) => {
            let entries: Vec<String> = items.iter().map(stable_stringify).collect();
            format!("[{}]", entries.join(","))
        }
        scalar => scalar.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_are_sorted_at_every_depth() {
        let value = json!({
            "b": {"z": 1, "a": 2},
            "a": 3
        });
        assert_eq!(stable_stringify(&value), r#"{"a":3,"b":{"a":2,"z":1}}"#);
    }

    #[test]
    fn test_key_permutation_produces_identical_output() {
        let forward = serde_json::from_str::<Value>(r#"{"owner":"u1","tag":"x"}"#).unwrap();
        let backward = serde_json::from_str::<Value>(r#"{"tag":"x","owner":"u1"}"#).unwrap();
        assert_eq!(stable_stringify(&forward), stable_stringify(&backward));
    }

    #[test]
    fn test_arrays_preserve_order() {
        let value = json!({"ids": [3, 1, 2]});
        assert_eq!(stable_stringify(&value), r#"{"ids":[3,1,2]}"#);
    }

    #[test]
    fn test_scalars_and_escaping() {
        assert_eq!(stable_stringify(&json!(null)), "null");
        assert_eq!(stable_stringify(&json!(true)), "true");
        assert_eq!(stable_stringify(&json!(1.5)), "1.5");
        assert_eq!(stable_stringify(&json!("a\"b")), r#""a\"b""#);
    }

    #[test]
    fn test_output_parses_back() {
        let value = json!({"b": [1, {"y": null, "x": "s"}], "a": true});
        let parsed: Value = serde_json::from_str(&stable_stringify(&value)).unwrap();
        assert_eq!(parsed, value);
    }
}
