//! Target schemas for structured generation.
//!
//! The backend is asked to honour the schema itself. The local check here is
//! deliberately shallow (top-level type, required properties and their
//! declared types) and only catches outputs that are obviously off-shape.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A named JSON schema describing the expected structured output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    /// Human-readable schema name, used in errors.
    pub name: String,
    /// The JSON schema document.
    pub schema: JsonValue,
}

impl OutputSchema {
    /// Creates a named schema.
    #[must_use]
    pub fn new(name: impl Into<String>, schema: JsonValue) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    /// Checks that `value` has the shape the schema declares.
    ///
    /// # Errors
    ///
    /// Returns a description of the first mismatch found.
    pub fn check(&self, value: &JsonValue) -> Result<(), String> {
        check_node(&self.schema, value, "$")
    }
}

fn check_node(schema: &JsonValue, value: &JsonValue, path: &str) -> Result<(), String> {
    if let Some(expected) = schema.get("type").and_then(JsonValue::as_str) {
        if !type_matches(expected, value) {
            return Err(format!(
                "{path}: expected {expected}, got {}",
                type_name(value)
            ));
        }
    }

    let Some(object) = value.as_object() else {
        return Ok(());
    };

    let properties = schema.get("properties").and_then(JsonValue::as_object);
    let required = schema
        .get("required")
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
        .filter_map(JsonValue::as_str);

    for key in required {
        let Some(field) = object.get(key) else {
            return Err(format!("{path}: missing required property '{key}'"));
        };
        if let Some(field_schema) = properties.and_then(|p| p.get(key)) {
            check_node(field_schema, field, &format!("{path}.{key}"))?;
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &JsonValue) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "null" => value.is_null(),
        // Unknown keywords are the backend's business.
        _ => true,
    }
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recipe_schema() -> OutputSchema {
        OutputSchema::new(
            "recipe",
            json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "servings": {"type": "integer"},
                    "steps": {"type": "array"}
                },
                "required": ["title", "servings"]
            }),
        )
    }

    #[test]
    fn accepts_conforming_value() {
        let value = json!({"title": "Soup", "servings": 4, "steps": ["boil"]});
        assert_eq!(recipe_schema().check(&value), Ok(()));
    }

    #[test]
    fn rejects_wrong_top_level_type() {
        let err = recipe_schema().check(&json!("soup")).expect_err("string is not object");
        assert!(err.contains("expected object"));
    }

    #[test]
    fn rejects_missing_required_property() {
        let err = recipe_schema()
            .check(&json!({"title": "Soup"}))
            .expect_err("servings missing");
        assert!(err.contains("servings"));
    }

    #[test]
    fn rejects_mistyped_required_property() {
        let err = recipe_schema()
            .check(&json!({"title": "Soup", "servings": "four"}))
            .expect_err("servings must be integer");
        assert_eq!(err, "$.servings: expected integer, got string");
    }

    #[test]
    fn optional_properties_are_not_checked() {
        let value = json!({"title": "Soup", "servings": 2, "steps": "boil"});
        assert_eq!(recipe_schema().check(&value), Ok(()));
    }

    #[test]
    fn schema_without_type_accepts_anything() {
        let schema = OutputSchema::new("free", json!({}));
        assert_eq!(schema.check(&json!([1, 2, 3])), Ok(()));
    }
}
