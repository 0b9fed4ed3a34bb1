//! Typed values and rows.
//!
//! A row is a tagged record: the table name plus an ordered map of typed
//! values. Validation and coercion from loose JSON input is a single
//! table-driven pass over the field specs, not per-shape generated code.

use crate::def::{FieldSpec, FieldType, TableSchema};
use crate::{Result, SchemaError};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single typed column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null or empty-string, the "unfilled" test used by trust scoring.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            Value::Json(serde_json::Value::Null) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    /// Coerce a loose JSON value into a typed value for `field_type`.
    ///
    /// Accepts the obvious string renderings (uuids, RFC 3339 datetimes,
    /// numerics inside JSON numbers). Anything else is a type mismatch.
    pub fn coerce(field_type: FieldType, raw: &serde_json::Value) -> std::result::Result<Self, String> {
        use serde_json::Value as J;

        if raw.is_null() {
            return Ok(Value::Null);
        }

        match field_type {
            FieldType::Uuid => match raw {
                J::String(s) => Uuid::parse_str(s)
                    .map(Value::Uuid)
                    .map_err(|_| format!("'{}' is not a valid uuid", s)),
                _ => Err("expected uuid string".to_string()),
            },
            FieldType::String | FieldType::Text => match raw {
                J::String(s) => Ok(Value::Text(s.clone())),
                J::Number(n) => Ok(Value::Text(n.to_string())),
                _ => Err("expected string".to_string()),
            },
            FieldType::Integer => match raw {
                J::Number(n) => n
                    .as_i64()
                    .map(Value::Integer)
                    .ok_or_else(|| format!("'{}' is not an integer", n)),
                _ => Err("expected integer".to_string()),
            },
            FieldType::Float => match raw {
                J::Number(n) => n
                    .as_f64()
                    .filter(|f| f.is_finite())
                    .map(Value::Float)
                    .ok_or_else(|| format!("'{}' is not a finite number", n)),
                _ => Err("expected number".to_string()),
            },
            FieldType::Boolean => match raw {
                J::Bool(b) => Ok(Value::Boolean(*b)),
                _ => Err("expected boolean".to_string()),
            },
            FieldType::Datetime => match raw {
                J::String(s) => DateTime::parse_from_rfc3339(s)
                    .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
                    .map_err(|_| format!("'{}' is not an RFC 3339 datetime", s)),
                _ => Err("expected datetime string".to_string()),
            },
            // JSON columns accept arbitrary structured values, no shape check.
            FieldType::Json => Ok(Value::Json(raw.clone())),
        }
    }

    /// Render back to loose JSON for API responses.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::json!(i),
            Value::Float(f) => serde_json::json!(f),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Uuid(u) => serde_json::Value::String(u.to_string()),
            Value::DateTime(dt) => serde_json::Value::String(dt.to_rfc3339()),
            Value::Json(v) => v.clone(),
        }
    }
}

/// A dynamically typed record conforming to a table definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub table: String,
    pub values: IndexMap<String, Value>,
}

impl Row {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: IndexMap::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    pub fn get_datetime(&self, field: &str) -> Option<DateTime<Utc>> {
        self.get(field).and_then(Value::as_datetime)
    }

    pub fn get_json(&self, field: &str) -> Option<&serde_json::Value> {
        self.get(field).and_then(Value::as_json)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.values.insert(field.into(), value);
    }

    /// The row's surrogate primary key, rendered as a string.
    pub fn id(&self) -> Option<String> {
        match self.values.get("id") {
            Some(Value::Uuid(u)) => Some(u.to_string()),
            Some(Value::Text(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Standard column: the row's trust score, defaulting to 0.0.
    pub fn trust_score(&self) -> f64 {
        self.get_f64("trust_score").unwrap_or(0.0)
    }

    /// Standard column: the governance stamp, when present and non-null.
    pub fn governance_stamp(&self) -> Option<&serde_json::Value> {
        match self.get_json("governance_stamp") {
            Some(serde_json::Value::Null) => None,
            other => other,
        }
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.get_datetime("created_at")
    }

    /// Render the row as a loose JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}

/// Validate loose JSON input against a schema and produce a typed row.
///
/// Strict: unknown columns are rejected, required fields must be present
/// and non-null, defaults are filled, generated fields are minted here
/// (uuid primary key, `created_at`).
pub fn validate_insert(schema: &TableSchema, data: &serde_json::Value) -> Result<Row> {
    let object = data.as_object().ok_or_else(|| SchemaError::Validation {
        table: schema.table_name.clone(),
        fields: vec![],
        message: "row data must be a JSON object".to_string(),
    })?;

    // Unknown columns are an author error, not forward-compat input.
    let unknown: Vec<String> = object
        .keys()
        .filter(|k| !schema.has_field(k))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(SchemaError::Validation {
            table: schema.table_name.clone(),
            fields: unknown,
            message: "unknown columns".to_string(),
        });
    }

    let mut row = Row::new(&schema.table_name);
    let mut violations: Vec<String> = Vec::new();
    let mut messages: Vec<String> = Vec::new();

    for field in &schema.fields {
        let provided = object.get(&field.name);

        let value = match provided {
            Some(raw) if !raw.is_null() => match Value::coerce(field.field_type, raw) {
                Ok(v) => v,
                Err(msg) => {
                    violations.push(field.name.clone());
                    messages.push(format!("{}: {}", field.name, msg));
                    continue;
                }
            },
            _ => generated_or_default(field)?,
        };

        if value.is_null() && field.required && !field.generated {
            violations.push(field.name.clone());
            messages.push(format!("{}: required field missing", field.name));
            continue;
        }

        row.set(field.name.clone(), value);
    }

    if !violations.is_empty() {
        return Err(SchemaError::Validation {
            table: schema.table_name.clone(),
            fields: violations,
            message: messages.join("; "),
        });
    }

    Ok(row)
}

/// Validate a partial update patch. Only known, non-generated fields may
/// be patched; values are coerced to the declared types.
pub fn validate_patch(
    schema: &TableSchema,
    patch: &serde_json::Value,
) -> Result<IndexMap<String, Value>> {
    let object = patch.as_object().ok_or_else(|| SchemaError::Validation {
        table: schema.table_name.clone(),
        fields: vec![],
        message: "patch must be a JSON object".to_string(),
    })?;

    let mut values = IndexMap::new();
    for (name, raw) in object {
        let field = schema.field(name).ok_or_else(|| SchemaError::Validation {
            table: schema.table_name.clone(),
            fields: vec![name.clone()],
            message: "unknown column".to_string(),
        })?;
        if field.primary_key {
            return Err(SchemaError::Validation {
                table: schema.table_name.clone(),
                fields: vec![name.clone()],
                message: "primary key cannot be patched".to_string(),
            });
        }
        let value = Value::coerce(field.field_type, raw).map_err(|msg| SchemaError::Validation {
            table: schema.table_name.clone(),
            fields: vec![name.clone()],
            message: format!("{}: {}", name, msg),
        })?;
        values.insert(name.clone(), value);
    }

    Ok(values)
}

fn generated_or_default(field: &FieldSpec) -> Result<Value> {
    if field.generated {
        return Ok(match field.field_type {
            FieldType::Uuid => Value::Uuid(Uuid::new_v4()),
            FieldType::Datetime => Value::DateTime(Utc::now()),
            _ => Value::Null,
        });
    }
    if let Some(default) = &field.default {
        return Value::coerce(field.field_type, default).map_err(|msg| {
            SchemaError::Validation {
                table: String::new(),
                fields: vec![field.name.clone()],
                message: format!("bad default for {}: {}", field.name, msg),
            }
        });
    }
    Ok(Value::Null)
}
