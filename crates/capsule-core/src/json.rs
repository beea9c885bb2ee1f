//! Document serialization: 2-space indent, recursively sorted keys, trailing newline.

use serde::Serialize;
use serde_json::{Map, Value};

/// Serialize a document the way manifests and reports are persisted.
pub fn document_bytes<T: Serialize>(doc: &T) -> serde_json::Result<Vec<u8>> {
    let value = sorted(serde_json::to_value(doc)?);
    let mut out = serde_json::to_vec_pretty(&value)?;
    out.push(b'\n');
    Ok(out)
}

/// Rebuild every object with its keys in sorted order.
pub fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k, sorted(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pretty_sorted_with_trailing_newline() {
        let doc = json!({"b": 1, "a": {"z": true, "c": [ {"y": 1, "x": 2} ]}});
        let bytes = document_bytes(&doc).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let expected = "{\n  \"a\": {\n    \"c\": [\n      {\n        \"x\": 2,\n        \"y\": 1\n      }\n    ],\n    \"z\": true\n  },\n  \"b\": 1\n}\n";
        assert_eq!(text, expected);
    }
}
