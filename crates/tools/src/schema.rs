//! Schema synthesis from a params example.
//!
//! Node actions carry a `params` example object instead of a schema; the
//! fabric reflects it into a JSON-Schema-like shape for tool listings.

use serde_json::{Value, json};

/// Reflect an example value into a schema describing its shape.
pub fn reflect_schema(example: &Value) -> Value {
    match example {
        Value::Object(map) => {
            let mut properties = serde_json::Map::new();
            for (key, value) in map {
                // providerId on the example is routing metadata, not a param.
                if key == "providerId" {
                    continue;
                }
                properties.insert(key.clone(), reflect_schema(value));
            }
            json!({"type": "object", "properties": properties})
        },
        Value::Array(items) => match items.first() {
            Some(first) => json!({"type": "array", "items": reflect_schema(first)}),
            None => json!({"type": "array"}),
        },
        Value::String(_) => json!({"type": "string"}),
        Value::Number(n) if n.is_i64() || n.is_u64() => json!({"type": "integer"}),
        Value::Number(_) => json!({"type": "number"}),
        Value::Bool(_) => json!({"type": "boolean"}),
        Value::Null => json!({}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflects_scalar_types() {
        let schema = reflect_schema(&json!({
            "title": "hello",
            "count": 3,
            "ratio": 0.5,
            "flag": true
        }));
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["title"]["type"], "string");
        assert_eq!(schema["properties"]["count"]["type"], "integer");
        assert_eq!(schema["properties"]["ratio"]["type"], "number");
        assert_eq!(schema["properties"]["flag"]["type"], "boolean");
    }

    #[test]
    fn reflects_nested_objects_and_arrays() {
        let schema = reflect_schema(&json!({
            "filter": {"tag": "x"},
            "ids": [1, 2]
        }));
        assert_eq!(schema["properties"]["filter"]["type"], "object");
        assert_eq!(
            schema["properties"]["filter"]["properties"]["tag"]["type"],
            "string"
        );
        assert_eq!(schema["properties"]["ids"]["items"]["type"], "integer");
    }

    #[test]
    fn provider_id_stripped() {
        let schema = reflect_schema(&json!({"providerId": "mcp:x", "q": "s"}));
        assert!(schema["properties"].get("providerId").is_none());
        assert!(schema["properties"].get("q").is_some());
    }

    #[test]
    fn empty_array_has_no_items() {
        let schema = reflect_schema(&json!([]));
        assert_eq!(schema, json!({"type": "array"}));
    }
}
