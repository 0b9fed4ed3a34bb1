//! Dynamic table schemas and the structured memory store.
//!
//! # Philosophy: declare, materialize, govern
//!
//! Table shapes in mnemon are data, not code:
//!
//! 1. **Declare**: one YAML file per table describes its fields
//! 2. **Load**: the registry parses and caches definitions at boot
//! 3. **Materialize**: tables are created in SQLite (`CREATE IF NOT EXISTS`)
//! 4. **Validate**: every insert is checked against the declaration
//! 5. **Extend**: changing a live table's column set is a governed proposal
//!
//! Rows are a tagged record (`table` + typed values) rather than generated
//! per-shape structs; validation is one table-driven pass. Insertion is
//! strict, reads are lenient: unknown columns coming back from storage are
//! ignored so old processes can read extended tables.
//!
//! # Modules
//!
//! - [`def`]: schema definitions (tables, fields, types)
//! - [`value`]: the typed value sum and coercion from JSON
//! - [`registry`]: load/cache/save definitions, governed extension
//! - [`store`]: SQLite materialization and CRUD with fingerprint upsert
//! - [`builtin`]: the built-in memory table set

pub mod builtin;
pub mod def;
pub mod registry;
pub mod store;
pub mod value;

pub use def::{FieldSpec, FieldType, TableSchema};
pub use registry::SchemaRegistry;
pub use store::{QueryOptions, TableStore};
pub use value::{Row, Value};

use thiserror::Error;

/// Errors from schema loading, validation and storage.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to parse schema {file}: {message}")]
    Parse { file: String, message: String },

    #[error("Invalid schema definition for '{table}': {message}")]
    InvalidDefinition { table: String, message: String },

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Validation failed for '{table}': {message} (fields: {})", fields.join(", "))]
    Validation {
        table: String,
        fields: Vec<String>,
        message: String,
    },

    #[error("Invalid row id: {0}")]
    InvalidId(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SchemaError>;
