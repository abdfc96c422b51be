//! Reduce JSON Schemas to the subset Gemini function declarations accept.
//!
//! Tool servers advertise full JSON Schema; the backend rejects keys such as
//! `default`, `additionalProperties` or `$schema`. Only `type`, `description`,
//! `properties`, `required`, `enum`, `items`, `format` and `nullable` survive.

use serde_json::{Map, Value};

const KEPT_KEYS: [&str; 8] = [
    "type",
    "description",
    "properties",
    "required",
    "enum",
    "items",
    "format",
    "nullable",
];

/// Sanitize a parameter schema for use in a function declaration.
pub fn sanitize(schema: &Value) -> Value {
    let Some(obj) = schema.as_object() else {
        return schema.clone();
    };

    let mut out = Map::new();
    for (key, value) in obj {
        if !KEPT_KEYS.contains(&key.as_str()) {
            continue;
        }
        let cleaned = match key.as_str() {
            "properties" => match value.as_object() {
                Some(props) => Value::Object(
                    props
                        .iter()
                        .map(|(name, prop)| (name.clone(), sanitize(prop)))
                        .collect(),
                ),
                None => continue,
            },
            "items" => sanitize(value),
            // Union types are not supported; keep the first non-null member.
            "type" => match value {
                Value::Array(types) => match types.iter().find(|t| t.as_str() != Some("null")) {
                    Some(t) => t.clone(),
                    None => continue,
                },
                other => other.clone(),
            },
            _ => value.clone(),
        };
        out.insert(key.clone(), cleaned);
    }

    // An object without properties is rejected by the backend.
    if out.get("type").and_then(Value::as_str) == Some("object") && !out.contains_key("properties")
    {
        out.insert("properties".into(), Value::Object(Map::new()));
    }
    Value::Object(out)
}

/// Whether a schema declares no parameters at all.
pub fn is_empty_object(schema: &Value) -> bool {
    schema["properties"].as_object().is_none_or(|p| p.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drops_unsupported_keys_recursively() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "query": {"type": "string", "description": "検索クエリ"},
                "num_results": {"type": "integer", "default": 5, "minimum": 1}
            },
            "required": ["query"]
        });
        let cleaned = sanitize(&schema);
        assert_eq!(
            cleaned,
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "検索クエリ"},
                    "num_results": {"type": "integer"}
                },
                "required": ["query"]
            })
        );
    }

    #[test]
    fn nested_items_are_sanitized() {
        let schema = json!({
            "type": "array",
            "items": {"type": "object", "additionalProperties": {"type": "string"}}
        });
        let cleaned = sanitize(&schema);
        assert_eq!(cleaned["items"], json!({"type": "object", "properties": {}}));
    }

    #[test]
    fn nullable_union_type_collapses() {
        let cleaned = sanitize(&json!({"type": ["null", "string"], "enum": ["ja", "en"]}));
        assert_eq!(cleaned, json!({"type": "string", "enum": ["ja", "en"]}));
    }

    #[test]
    fn empty_object_detection() {
        assert!(is_empty_object(&json!({"type": "object", "properties": {}})));
        assert!(is_empty_object(&json!({"type": "object"})));
        assert!(!is_empty_object(&json!({"properties": {"a": {"type": "string"}}})));
    }
}
