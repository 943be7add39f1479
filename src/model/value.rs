// Small helpers over the JSON value model

use serde_json::Value;

/// Human-readable name of a JSON value's kind, for error messages
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

/// Coerce a scalar to its string form; `None` for null and compound values
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_coercion() {
        assert_eq!(scalar_to_string(&json!("a")), Some("a".to_string()));
        assert_eq!(scalar_to_string(&json!(3)), Some("3".to_string()));
        assert_eq!(scalar_to_string(&json!(true)), Some("true".to_string()));
        assert_eq!(scalar_to_string(&json!(null)), None);
        assert_eq!(scalar_to_string(&json!([1])), None);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(type_name(&json!({})), "mapping");
        assert_eq!(type_name(&json!([])), "sequence");
        assert_eq!(type_name(&json!("x")), "string");
    }
}
