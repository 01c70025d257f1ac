//! Field values and semantic types.
//!
//! `Value` is the tagged union every record field holds in memory;
//! `FieldType` is the declared semantic type a model assigns to a field.
//! The wire helpers convert between the in-memory representation and what
//! the durable/cache backends store: dates become epoch-millisecond
//! integers truncated to whole seconds, arrays and objects become JSON
//! text.

use crate::error::{TandemError, TandemResult};
use chrono::{DateTime, TimeZone, Utc};

/// One stored row / raw field map, ordered for deterministic encoding.
pub type Row = std::collections::BTreeMap<String, Value>;

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(DateTime<Utc>),
    Array(Vec<Value>),
    Object(serde_json::Map<String, serde_json::Value>),
}

impl Value {
    /// Runtime type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::Str(_) => "string",
            Value::Date(_) => "date",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Renders a scalar value as a key segment for cache/document keys.
    ///
    /// Non-scalar values are rejected; keys are built only from scalar
    /// primary/shard fields, which schema validation guarantees.
    pub fn key_segment(&self) -> TandemResult<String> {
        match self {
            Value::Int(n) => Ok(n.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            Value::Str(s) => Ok(s.clone()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(TandemError::Serialization(format!(
                "cannot use {} value as a key segment",
                other.type_name()
            ))),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Date(v)
    }
}

/// Declared semantic type of a model field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Number,
    String,
    Boolean,
    Date,
    Array,
    Object,
    /// Reference to another registered model, stored as an object payload.
    Reference(std::string::String),
}

impl FieldType {
    /// Type name used in error messages and schema dumps.
    pub fn name(&self) -> std::string::String {
        match self {
            FieldType::Number => "number".to_string(),
            FieldType::String => "string".to_string(),
            FieldType::Boolean => "boolean".to_string(),
            FieldType::Date => "date".to_string(),
            FieldType::Array => "array".to_string(),
            FieldType::Object => "object".to_string(),
            FieldType::Reference(model) => format!("ref<{model}>"),
        }
    }

    /// Scalar types are the only ones allowed as shard keys.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            FieldType::Number | FieldType::String | FieldType::Boolean
        )
    }

    /// Whether `value` is acceptable for this type. Null is always
    /// acceptable (unset fields).
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldType::Number, Value::Int(_) | Value::Float(_)) => true,
            (FieldType::String, Value::Str(_)) => true,
            (FieldType::Boolean, Value::Bool(_)) => true,
            (FieldType::Date, Value::Date(_)) => true,
            (FieldType::Array, Value::Array(_)) => true,
            (FieldType::Object, Value::Object(_)) => true,
            (FieldType::Reference(_), Value::Object(_)) => true,
            _ => false,
        }
    }

    /// Validates a write against this type.
    pub fn check(&self, model: &str, field: &str, value: &Value) -> TandemResult<()> {
        if self.accepts(value) {
            Ok(())
        } else {
            Err(TandemError::TypeMismatch {
                model: model.to_string(),
                field: field.to_string(),
                expected: self.name(),
                actual: value.type_name().to_string(),
            })
        }
    }
}

// ════════════════════════════════════════════
// Wire encoding
// ════════════════════════════════════════════

/// Epoch milliseconds with the sub-second remainder dropped.
fn truncate_millis(date: &DateTime<Utc>) -> i64 {
    let ms = date.timestamp_millis();
    ms - ms.rem_euclid(1000)
}

/// Converts an in-memory value to its store representation.
pub fn encode_wire(value: &Value) -> TandemResult<Value> {
    match value {
        Value::Date(d) => Ok(Value::Int(truncate_millis(d))),
        Value::Array(items) => {
            let json: Vec<serde_json::Value> =
                items.iter().map(value_to_json).collect::<TandemResult<_>>()?;
            Ok(Value::Str(serde_json::to_string(&json)?))
        }
        Value::Object(map) => Ok(Value::Str(serde_json::to_string(map)?)),
        other => Ok(other.clone()),
    }
}

/// Converts a store representation back to the in-memory value declared
/// by `ty`.
pub fn decode_wire(ty: &FieldType, value: &Value) -> TandemResult<Value> {
    match (ty, value) {
        (_, Value::Null) => Ok(Value::Null),
        (FieldType::Date, Value::Int(ms)) => Utc
            .timestamp_millis_opt(*ms)
            .single()
            .map(Value::Date)
            .ok_or_else(|| {
                TandemError::Serialization(format!("epoch millis {ms} out of range"))
            }),
        (FieldType::Date, Value::Date(d)) => Ok(Value::Date(*d)),
        (FieldType::Array, Value::Str(text)) => {
            let json: Vec<serde_json::Value> = serde_json::from_str(text)?;
            Ok(Value::Array(json.into_iter().map(json_to_value).collect()))
        }
        (FieldType::Array, Value::Array(items)) => Ok(Value::Array(items.clone())),
        (FieldType::Object | FieldType::Reference(_), Value::Str(text)) => {
            let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(text)?;
            Ok(Value::Object(map))
        }
        (FieldType::Object | FieldType::Reference(_), Value::Object(map)) => {
            Ok(Value::Object(map.clone()))
        }
        (_, other) => Ok(other.clone()),
    }
}

/// Converts a value to JSON for whole-record cache/document payloads.
pub fn value_to_json(value: &Value) -> TandemResult<serde_json::Value> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(n) => serde_json::Value::Number((*n).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| {
                TandemError::Serialization("non-finite float is not storable".to_string())
            })?,
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Date(d) => serde_json::Value::Number(truncate_millis(d).into()),
        Value::Array(items) => serde_json::Value::Array(
            items.iter().map(value_to_json).collect::<TandemResult<_>>()?,
        ),
        Value::Object(map) => serde_json::Value::Object(map.clone()),
    })
}

/// Reverses [`value_to_json`] using the declared field type.
pub fn json_to_typed(ty: &FieldType, json: &serde_json::Value) -> TandemResult<Value> {
    Ok(match (ty, json) {
        (_, serde_json::Value::Null) => Value::Null,
        (FieldType::Date, serde_json::Value::Number(n)) => {
            let ms = n.as_i64().ok_or_else(|| {
                TandemError::Serialization(format!("bad epoch millis: {n}"))
            })?;
            Utc.timestamp_millis_opt(ms).single().map(Value::Date).ok_or_else(|| {
                TandemError::Serialization(format!("epoch millis {ms} out of range"))
            })?
        }
        (_, other) => json_to_value(other.clone()),
    })
}

/// Untyped JSON-to-value conversion (array elements and raw payload maps
/// where no element type is declared).
pub fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(map) => Value::Object(map),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_type_check_accepts_matching() {
        assert!(FieldType::Number.check("M", "f", &Value::Int(1)).is_ok());
        assert!(FieldType::Number.check("M", "f", &Value::Float(1.5)).is_ok());
        assert!(FieldType::String.check("M", "f", &Value::Str("x".into())).is_ok());
        assert!(FieldType::Boolean.check("M", "f", &Value::Bool(true)).is_ok());
        assert!(FieldType::Array.check("M", "f", &Value::Array(vec![])).is_ok());
    }

    #[test]
    fn test_type_check_null_always_ok() {
        assert!(FieldType::Date.check("M", "f", &Value::Null).is_ok());
    }

    #[test]
    fn test_type_check_mismatch_names_everything() {
        let err = FieldType::Number
            .check("Item", "money", &Value::Str("lots".into()))
            .unwrap_err();
        match err {
            TandemError::TypeMismatch {
                model,
                field,
                expected,
                actual,
            } => {
                assert_eq!(model, "Item");
                assert_eq!(field, "money");
                assert_eq!(expected, "number");
                assert_eq!(actual, "string");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_date_wire_truncates_to_whole_seconds() {
        let date = Utc.timestamp_millis_opt(1_700_000_123_456).unwrap();
        let wire = encode_wire(&Value::Date(date)).unwrap();
        assert_eq!(wire, Value::Int(1_700_000_123_000));

        let back = decode_wire(&FieldType::Date, &wire).unwrap();
        match back {
            Value::Date(d) => assert_eq!(d.timestamp_millis(), 1_700_000_123_000),
            other => panic!("expected date, got {other:?}"),
        }
    }

    #[test]
    fn test_array_wire_round_trip() {
        let original = Value::Array(vec![Value::Int(1), Value::Str("two".into())]);
        let wire = encode_wire(&original).unwrap();
        assert!(matches!(wire, Value::Str(_)));
        let back = decode_wire(&FieldType::Array, &wire).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_object_wire_round_trip() {
        let mut map = serde_json::Map::new();
        map.insert("a".to_string(), serde_json::json!([1, 2]));
        let original = Value::Object(map);
        let wire = encode_wire(&original).unwrap();
        let back = decode_wire(&FieldType::Object, &wire).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_nan_rejected_in_json_payload() {
        assert!(value_to_json(&Value::Float(f64::NAN)).is_err());
    }

    #[test]
    fn test_scalar_predicate() {
        assert!(FieldType::Number.is_scalar());
        assert!(FieldType::String.is_scalar());
        assert!(FieldType::Boolean.is_scalar());
        assert!(!FieldType::Array.is_scalar());
        assert!(!FieldType::Reference("User".into()).is_scalar());
    }
}
