//! Structural checks on the JSON schemas games attach to their actions.
//!
//! This does not validate instances against a schema, it only decides
//! whether a schema is something the completion service can accept as
//! tool parameters.

use serde_json::{Map, Value};

const TYPE_NAMES: &[&str] = &[
    "object", "array", "string", "number", "integer", "boolean", "null",
];

const SCHEMA_LISTS: &[&str] = &["anyOf", "oneOf", "allOf"];
const NUMBER_KEYWORDS: &[&str] = &[
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "multipleOf",
];
const COUNT_KEYWORDS: &[&str] = &[
    "minLength",
    "maxLength",
    "minItems",
    "maxItems",
    "minProperties",
    "maxProperties",
];

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
#[error("{path}: {reason}")]
pub struct SchemaError {
    pub path: String,
    pub reason: String,
}

impl SchemaError {
    fn new(path: &str, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Check that `schema` is a well-formed parameter schema.
///
/// The root must be an object and, if it declares a type, that type must be
/// `object`. Nested schemas may also be the boolean forms `true`/`false`.
pub fn validate_schema(schema: &Value) -> Result<(), SchemaError> {
    let root = schema
        .as_object()
        .ok_or_else(|| SchemaError::new("$", "schema must be a JSON object"))?;
    if let Some(ty) = root.get("type") {
        if ty.as_str() != Some("object") {
            return Err(SchemaError::new("$.type", "root type must be \"object\""));
        }
    }
    check_object(root, "$")
}

fn check_schema(schema: &Value, path: &str) -> Result<(), SchemaError> {
    match schema {
        Value::Bool(_) => Ok(()),
        Value::Object(map) => check_object(map, path),
        _ => Err(SchemaError::new(path, "expected a schema object or boolean")),
    }
}

fn check_object(map: &Map<String, Value>, path: &str) -> Result<(), SchemaError> {
    if let Some(ty) = map.get("type") {
        check_type(ty, &format!("{}.type", path))?;
    }

    if let Some(props) = map.get("properties") {
        let props = props
            .as_object()
            .ok_or_else(|| SchemaError::new(&format!("{}.properties", path), "expected an object"))?;
        for (name, sub) in props {
            check_schema(sub, &format!("{}.properties.{}", path, name))?;
        }
    }

    if let Some(required) = map.get("required") {
        let p = format!("{}.required", path);
        let list = required
            .as_array()
            .ok_or_else(|| SchemaError::new(&p, "expected an array of property names"))?;
        if list.iter().any(|v| !v.is_string()) {
            return Err(SchemaError::new(&p, "property names must be strings"));
        }
    }

    if let Some(items) = map.get("items") {
        let p = format!("{}.items", path);
        match items {
            Value::Array(list) => {
                for (i, sub) in list.iter().enumerate() {
                    check_schema(sub, &format!("{}[{}]", p, i))?;
                }
            }
            other => check_schema(other, &p)?,
        }
    }

    if let Some(extra) = map.get("additionalProperties") {
        check_schema(extra, &format!("{}.additionalProperties", path))?;
    }

    if let Some(values) = map.get("enum") {
        match values.as_array() {
            Some(list) if !list.is_empty() => {}
            _ => {
                return Err(SchemaError::new(
                    &format!("{}.enum", path),
                    "expected a non-empty array",
                ))
            }
        }
    }

    for key in SCHEMA_LISTS {
        if let Some(list) = map.get(*key) {
            let p = format!("{}.{}", path, key);
            let list = match list.as_array() {
                Some(list) if !list.is_empty() => list,
                _ => return Err(SchemaError::new(&p, "expected a non-empty array of schemas")),
            };
            for (i, sub) in list.iter().enumerate() {
                check_schema(sub, &format!("{}[{}]", p, i))?;
            }
        }
    }

    for key in NUMBER_KEYWORDS {
        if let Some(v) = map.get(*key) {
            if !v.is_number() {
                return Err(SchemaError::new(&format!("{}.{}", path, key), "expected a number"));
            }
        }
    }

    for key in COUNT_KEYWORDS {
        if let Some(v) = map.get(*key) {
            if v.as_u64().is_none() {
                return Err(SchemaError::new(
                    &format!("{}.{}", path, key),
                    "expected a non-negative integer",
                ));
            }
        }
    }

    for key in ["title", "description", "pattern", "format"] {
        if let Some(v) = map.get(key) {
            if !v.is_string() {
                return Err(SchemaError::new(&format!("{}.{}", path, key), "expected a string"));
            }
        }
    }

    Ok(())
}

fn check_type(ty: &Value, path: &str) -> Result<(), SchemaError> {
    let valid = |v: &Value| v.as_str().is_some_and(|s| TYPE_NAMES.contains(&s));
    match ty {
        Value::String(_) if valid(ty) => Ok(()),
        Value::Array(list) if !list.is_empty() && list.iter().all(valid) => Ok(()),
        _ => Err(SchemaError::new(path, format!("invalid type {}", ty))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_schema_is_valid() {
        assert!(validate_schema(&json!({})).is_ok());
    }

    #[test]
    fn test_nested_schema_is_valid() {
        let schema = json!({
            "type": "object",
            "properties": {
                "target": { "type": "string", "enum": ["north", "south"] },
                "count": { "type": "integer", "minimum": 1, "maximum": 5 },
                "tags": { "type": "array", "items": { "type": "string" }, "maxItems": 3 },
                "extra": true
            },
            "required": ["target"]
        });
        assert!(validate_schema(&schema).is_ok());
    }

    #[test]
    fn test_root_must_be_object() {
        assert_eq!(validate_schema(&json!("object")).unwrap_err().path, "$");
        assert_eq!(
            validate_schema(&json!({"type": "string"})).unwrap_err().path,
            "$.type"
        );
    }

    #[test]
    fn test_unknown_type_name() {
        let err = validate_schema(&json!({
            "type": "object",
            "properties": { "x": { "type": "float" } }
        }))
        .unwrap_err();
        assert_eq!(err.path, "$.properties.x.type");
    }

    #[test]
    fn test_required_must_list_strings() {
        let err = validate_schema(&json!({"type": "object", "required": [1]})).unwrap_err();
        assert_eq!(err.path, "$.required");
    }

    #[test]
    fn test_empty_enum_rejected() {
        let err = validate_schema(&json!({
            "properties": { "mode": { "enum": [] } }
        }))
        .unwrap_err();
        assert_eq!(err.path, "$.properties.mode.enum");
    }

    #[test]
    fn test_negative_count_rejected() {
        let err = validate_schema(&json!({
            "properties": { "name": { "type": "string", "minLength": -1 } }
        }))
        .unwrap_err();
        assert_eq!(err.path, "$.properties.name.minLength");
    }
}
