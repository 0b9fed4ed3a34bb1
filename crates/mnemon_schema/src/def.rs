//! Schema definitions: the declarative shape of a memory table.
//!
//! Definitions are human-authored YAML, one file per table. Every table
//! gets the standard columns (`trust_score`, `governance_stamp`,
//! `created_at`) appended if the author omitted them, and must declare
//! exactly one primary key.

use crate::{Result, SchemaError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Column types a table definition may use.
///
/// This is the CANONICAL definition - use this everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Uuid,
    String,
    Text,
    Integer,
    Float,
    Boolean,
    Datetime,
    Json,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Uuid => "uuid",
            FieldType::String => "string",
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Datetime => "datetime",
            FieldType::Json => "json",
        }
    }

    /// The SQLite column type this field materializes to.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Uuid | FieldType::String | FieldType::Text | FieldType::Datetime => "TEXT",
            FieldType::Integer | FieldType::Boolean => "INTEGER",
            FieldType::Float => "REAL",
            FieldType::Json => "TEXT",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uuid" => Ok(FieldType::Uuid),
            "string" => Ok(FieldType::String),
            "text" => Ok(FieldType::Text),
            "integer" => Ok(FieldType::Integer),
            "float" => Ok(FieldType::Float),
            "boolean" => Ok(FieldType::Boolean),
            "datetime" => Ok(FieldType::Datetime),
            "json" => Ok(FieldType::Json),
            _ => Err(format!("Invalid field type: '{}'", s)),
        }
    }
}

/// One field in a table definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Required fields must be present and non-null on insert.
    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub primary_key: bool,

    #[serde(default)]
    pub nullable: bool,

    /// Default value applied when the field is absent on insert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,

    /// Generated fields are filled by the store (uuid pk, created_at).
    #[serde(default)]
    pub generated: bool,

    /// Marks the table's logical fingerprint used for idempotent upsert.
    #[serde(default)]
    pub fingerprint: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            primary_key: false,
            nullable: false,
            default: None,
            generated: false,
            fingerprint: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.generated = true;
        self
    }

    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    pub fn fingerprint(mut self) -> Self {
        self.fingerprint = true;
        self
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// A declarative table definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    #[serde(rename = "table")]
    pub table_name: String,

    #[serde(default)]
    pub description: String,

    pub fields: Vec<FieldSpec>,
}

impl TableSchema {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            description: String::new(),
            fields: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Parse a definition from YAML, append standard columns, validate.
    pub fn from_yaml(source: &str, origin: &str) -> Result<Self> {
        let mut schema: TableSchema =
            serde_yaml::from_str(source).map_err(|e| SchemaError::Parse {
                file: origin.to_string(),
                message: e.to_string(),
            })?;
        schema.append_standard_columns();
        schema.validate()?;
        Ok(schema)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| SchemaError::Parse {
            file: self.table_name.clone(),
            message: e.to_string(),
        })
    }

    /// Append `trust_score`, `governance_stamp` and `created_at` when the
    /// author omitted them. Every table carries these.
    pub fn append_standard_columns(&mut self) {
        if !self.has_field("trust_score") {
            self.fields.push(
                FieldSpec::new("trust_score", FieldType::Float)
                    .with_default(serde_json::json!(0.0)),
            );
        }
        if !self.has_field("governance_stamp") {
            self.fields
                .push(FieldSpec::new("governance_stamp", FieldType::Json).nullable());
        }
        if !self.has_field("created_at") {
            self.fields
                .push(FieldSpec::new("created_at", FieldType::Datetime).generated());
        }
    }

    /// Structural checks: one primary key, legal identifiers, no duplicate
    /// field names, at most one fingerprint.
    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.table_name) {
            return Err(SchemaError::InvalidDefinition {
                table: self.table_name.clone(),
                message: "table name must be a lowercase identifier".to_string(),
            });
        }

        let pk_count = self.fields.iter().filter(|f| f.primary_key).count();
        if pk_count != 1 {
            return Err(SchemaError::InvalidDefinition {
                table: self.table_name.clone(),
                message: format!("expected exactly one primary key, found {}", pk_count),
            });
        }

        let fp_count = self.fields.iter().filter(|f| f.fingerprint).count();
        if fp_count > 1 {
            return Err(SchemaError::InvalidDefinition {
                table: self.table_name.clone(),
                message: format!("at most one fingerprint field allowed, found {}", fp_count),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            if !is_identifier(&field.name) {
                return Err(SchemaError::InvalidDefinition {
                    table: self.table_name.clone(),
                    message: format!("illegal field name '{}'", field.name),
                });
            }
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::InvalidDefinition {
                    table: self.table_name.clone(),
                    message: format!("duplicate field '{}'", field.name),
                });
            }
        }

        Ok(())
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The primary key field. Definitions are validated to have one.
    pub fn primary_key(&self) -> &FieldSpec {
        self.fields
            .iter()
            .find(|f| f.primary_key)
            .unwrap_or(&self.fields[0])
    }

    /// The logical fingerprint field, if the table declares one.
    pub fn fingerprint_field(&self) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.fingerprint)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

/// Identifier rule shared by table and field names. These names are
/// interpolated into SQL, so nothing but `[a-z_][a-z0-9_]*` passes.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
