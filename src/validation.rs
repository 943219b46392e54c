//! Input validation for execution parameters
//!
//! Size and depth limits for caller-supplied JSON, plus the lenient coercion applied when
//! a parameter arrives as text (CLI flags, form fields) but is declared with another type.

use crate::context::VariableType;
use crate::error::FieldError;
use crate::interaction::parse_confirmation;
use serde_json::Value;

/// Maximum allowed size for one parameter payload (256KB)
const MAX_JSON_SIZE_BYTES: usize = 256 * 1024;

/// Maximum nesting depth for JSON objects/arrays
const MAX_JSON_DEPTH: usize = 10;

/// Maximum number of keys in a JSON object or items in an array
const MAX_JSON_KEYS: usize = 1000;

/// Maximum string length for JSON string values
const MAX_JSON_STRING_LENGTH: usize = 10000;

/// Validates a parameter value for size and structure constraints
pub fn validate_json_payload(field: &str, value: &Value) -> Result<(), FieldError> {
    let serialized = serde_json::to_string(value)
        .map_err(|e| FieldError::new(field, format!("invalid JSON structure: {e}")))?;

    if serialized.len() > MAX_JSON_SIZE_BYTES {
        return Err(FieldError::new(
            field,
            format!(
                "payload too large: {} bytes (max: {})",
                serialized.len(),
                MAX_JSON_SIZE_BYTES
            ),
        ));
    }

    validate_json_depth(field, value, 0)
}

fn validate_json_depth(field: &str, value: &Value, current_depth: usize) -> Result<(), FieldError> {
    if current_depth > MAX_JSON_DEPTH {
        return Err(FieldError::new(
            field,
            format!("nesting too deep: {current_depth} (max: {MAX_JSON_DEPTH})"),
        ));
    }

    match value {
        Value::Object(map) => {
            if map.len() > MAX_JSON_KEYS {
                return Err(FieldError::new(
                    field,
                    format!("too many keys: {} (max: {})", map.len(), MAX_JSON_KEYS),
                ));
            }

            for (key, val) in map {
                if key.len() > MAX_JSON_STRING_LENGTH {
                    return Err(FieldError::new(
                        field,
                        format!(
                            "key too long: {} chars (max: {})",
                            key.len(),
                            MAX_JSON_STRING_LENGTH
                        ),
                    ));
                }
                validate_json_depth(field, val, current_depth + 1)?;
            }
        }
        Value::Array(arr) => {
            if arr.len() > MAX_JSON_KEYS {
                return Err(FieldError::new(
                    field,
                    format!("array too large: {} items (max: {})", arr.len(), MAX_JSON_KEYS),
                ));
            }
            for item in arr {
                validate_json_depth(field, item, current_depth + 1)?;
            }
        }
        Value::String(s) => {
            if s.len() > MAX_JSON_STRING_LENGTH {
                return Err(FieldError::new(
                    field,
                    format!(
                        "string too long: {} chars (max: {})",
                        s.len(),
                        MAX_JSON_STRING_LENGTH
                    ),
                ));
            }
        }
        _ => {}
    }

    Ok(())
}

/// Coerce a parameter value to its declared type
///
/// Values that already have the declared type pass through. Strings are parsed into
/// ints, bools (`yes`/`no`/`true`/`false`/`1`/`0`), JSON objects, and arrays (JSON
/// array text or a comma-separated list). Scalars become strings when a string is
/// declared. Returns `None` when no sensible conversion exists.
pub fn coerce_to_type(value: &Value, ty: VariableType) -> Option<Value> {
    if VariableType::of(value) == Some(ty) {
        return Some(value.clone());
    }

    match (ty, value) {
        (VariableType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (VariableType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        (VariableType::Int, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
        (VariableType::Int, Value::Number(n)) => n
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| Value::from(f as i64)),
        (VariableType::Bool, Value::String(s)) => parse_confirmation(s).map(Value::Bool),
        (VariableType::Array, Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.starts_with('[') {
                serde_json::from_str::<Value>(trimmed)
                    .ok()
                    .filter(Value::is_array)
            } else if trimmed.is_empty() {
                Some(Value::Array(Vec::new()))
            } else {
                Some(Value::Array(
                    trimmed
                        .split(',')
                        .map(|item| Value::String(item.trim().to_string()))
                        .collect(),
                ))
            }
        }
        (VariableType::Object, Value::String(s)) => serde_json::from_str::<Value>(s.trim())
            .ok()
            .filter(Value::is_object),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_payload() {
        let value = json!({"image": "nginx:latest", "ports": [80, 443]});
        assert!(validate_json_payload("config", &value).is_ok());
    }

    #[test]
    fn test_payload_too_deep() {
        let mut deep = json!({});
        for _ in 0..15 {
            deep = json!({ "nested": deep });
        }
        let err = validate_json_payload("config", &deep).unwrap_err();
        assert_eq!(err.field, "config");
        assert!(err.message.contains("nesting too deep"));
    }

    #[test]
    fn test_string_too_long() {
        let value = Value::String("x".repeat(MAX_JSON_STRING_LENGTH + 1));
        let err = validate_json_payload("banner", &value).unwrap_err();
        assert!(err.message.contains("string too long"));
    }

    #[test]
    fn test_coerce_from_text() {
        assert_eq!(coerce_to_type(&json!("8080"), VariableType::Int), Some(json!(8080)));
        assert_eq!(coerce_to_type(&json!("yes"), VariableType::Bool), Some(json!(true)));
        assert_eq!(
            coerce_to_type(&json!("a, b"), VariableType::Array),
            Some(json!(["a", "b"]))
        );
        assert_eq!(
            coerce_to_type(&json!("{\"k\": 1}"), VariableType::Object),
            Some(json!({"k": 1}))
        );
        assert_eq!(coerce_to_type(&json!(3), VariableType::String), Some(json!("3")));
    }

    #[test]
    fn test_coerce_rejects_nonsense() {
        assert_eq!(coerce_to_type(&json!("eighty"), VariableType::Int), None);
        assert_eq!(coerce_to_type(&json!("maybe"), VariableType::Bool), None);
        assert_eq!(coerce_to_type(&json!(1.5), VariableType::Int), None);
        assert_eq!(coerce_to_type(&json!(null), VariableType::String), None);
    }
}
