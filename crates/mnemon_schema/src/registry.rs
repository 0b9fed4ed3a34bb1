//! The schema registry: loads table definitions from a directory of YAML
//! files and serves them from a read-mostly cache.
//!
//! Extension of a live table's column set is a governed operation; the
//! swap happens under a brief write lock so readers never observe a
//! half-extended schema.

use crate::def::TableSchema;
use crate::{Result, SchemaError};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{error, info, warn};

/// Registry of table definitions, keyed by table name in load order.
pub struct SchemaRegistry {
    schema_dir: PathBuf,
    schemas: RwLock<IndexMap<String, TableSchema>>,
}

impl SchemaRegistry {
    pub fn new(schema_dir: impl Into<PathBuf>) -> Self {
        Self {
            schema_dir: schema_dir.into(),
            schemas: RwLock::new(IndexMap::new()),
        }
    }

    pub fn schema_dir(&self) -> &Path {
        &self.schema_dir
    }

    /// Load all YAML definitions from the schema directory.
    ///
    /// Idempotent: a reload replaces previously cached definitions with
    /// the same table name. Bad files are logged and skipped; the return
    /// value counts successful loads.
    pub fn load_all(&self) -> usize {
        let mut count = 0;

        if !self.schema_dir.exists() {
            warn!("Schema directory not found: {}", self.schema_dir.display());
            return count;
        }

        let mut entries: Vec<PathBuf> = match std::fs::read_dir(&self.schema_dir) {
            Ok(read) => read
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.extension()
                        .map(|ext| ext == "yaml" || ext == "yml")
                        .unwrap_or(false)
                })
                .collect(),
            Err(e) => {
                error!("Failed to read schema directory: {}", e);
                return count;
            }
        };
        entries.sort();

        for path in entries {
            match self.load_file(&path) {
                Ok(table_name) => {
                    info!("Loaded schema: {}", table_name);
                    count += 1;
                }
                Err(e) => {
                    error!("Failed to load schema {}: {}", path.display(), e);
                }
            }
        }

        count
    }

    fn load_file(&self, path: &Path) -> Result<String> {
        let source = std::fs::read_to_string(path)?;
        let schema = TableSchema::from_yaml(&source, &path.display().to_string())?;
        let table_name = schema.table_name.clone();
        self.register(schema);
        Ok(table_name)
    }

    /// Register a definition directly (built-ins, tests, governed creates).
    pub fn register(&self, schema: TableSchema) {
        let mut guard = self.schemas.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(schema.table_name.clone(), schema);
    }

    pub fn has(&self, table: &str) -> bool {
        let guard = self.schemas.read().unwrap_or_else(|e| e.into_inner());
        guard.contains_key(table)
    }

    pub fn list(&self) -> Vec<String> {
        let guard = self.schemas.read().unwrap_or_else(|e| e.into_inner());
        guard.keys().cloned().collect()
    }

    pub fn get(&self, table: &str) -> Option<TableSchema> {
        let guard = self.schemas.read().unwrap_or_else(|e| e.into_inner());
        guard.get(table).cloned()
    }

    pub fn require(&self, table: &str) -> Result<TableSchema> {
        self.get(table)
            .ok_or_else(|| SchemaError::UnknownTable(table.to_string()))
    }

    pub fn len(&self) -> usize {
        let guard = self.schemas.read().unwrap_or_else(|e| e.into_inner());
        guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist a definition to the schema directory and hot-register it.
    ///
    /// Used by governed `create_table` approvals; the file lands next to
    /// the human-authored ones so the next boot picks it up.
    pub fn save_schema(&self, schema: &TableSchema) -> Result<PathBuf> {
        schema.validate()?;
        std::fs::create_dir_all(&self.schema_dir)?;
        let path = self.schema_dir.join(format!("{}.yaml", schema.table_name));
        std::fs::write(&path, schema.to_yaml()?)?;
        self.register(schema.clone());
        info!("Saved schema: {}", schema.table_name);
        Ok(path)
    }

    /// Extend an existing table with new fields. The cache swap is a
    /// single write-lock section: readers see the old or the new shape,
    /// never a mix. The caller is responsible for having routed the
    /// extension through governance and for materializing the new columns.
    pub fn extend(&self, table: &str, new_fields: Vec<crate::def::FieldSpec>) -> Result<TableSchema> {
        let mut extended = self.require(table)?;
        for field in new_fields {
            if extended.has_field(&field.name) {
                return Err(SchemaError::InvalidDefinition {
                    table: table.to_string(),
                    message: format!("field '{}' already exists", field.name),
                });
            }
            if field.primary_key || field.required {
                return Err(SchemaError::InvalidDefinition {
                    table: table.to_string(),
                    message: format!(
                        "extension field '{}' cannot be primary key or required",
                        field.name
                    ),
                });
            }
            extended.fields.push(field);
        }
        extended.validate()?;

        {
            let mut guard = self.schemas.write().unwrap_or_else(|e| e.into_inner());
            guard.insert(table.to_string(), extended.clone());
        }

        // Best-effort persistence; the in-memory shape is authoritative.
        if let Err(e) = self.save_schema(&extended) {
            warn!("Failed to persist extended schema for {}: {}", table, e);
        }

        Ok(extended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::{FieldSpec, FieldType};

    fn write_schema(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(format!("{}.yaml", name)), body).unwrap();
    }

    #[test]
    fn load_all_counts_good_files_and_skips_bad() {
        let dir = tempfile::tempdir().unwrap();
        write_schema(
            dir.path(),
            "memory_documents",
            r#"
table: memory_documents
fields:
  - name: id
    type: uuid
    primary_key: true
  - name: title
    type: string
"#,
        );
        write_schema(dir.path(), "broken", "not: [valid: yaml: here");

        let registry = SchemaRegistry::new(dir.path());
        assert_eq!(registry.load_all(), 1);
        assert!(registry.has("memory_documents"));
        assert!(!registry.has("broken"));
    }

    #[test]
    fn load_all_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_schema(
            dir.path(),
            "memory_documents",
            r#"
table: memory_documents
fields:
  - name: id
    type: uuid
    primary_key: true
"#,
        );
        let registry = SchemaRegistry::new(dir.path());
        assert_eq!(registry.load_all(), 1);
        assert_eq!(registry.load_all(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn save_schema_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SchemaRegistry::new(dir.path());

        let mut schema = TableSchema::new("memory_notes")
            .with_field(FieldSpec::new("id", FieldType::Uuid).primary_key())
            .with_field(FieldSpec::new("body", FieldType::Text));
        schema.append_standard_columns();
        registry.save_schema(&schema).unwrap();

        let fresh = SchemaRegistry::new(dir.path());
        assert_eq!(fresh.load_all(), 1);
        assert!(fresh.has("memory_notes"));
    }

    #[test]
    fn extend_adds_nullable_fields_only() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SchemaRegistry::new(dir.path());
        let mut schema = TableSchema::new("memory_notes")
            .with_field(FieldSpec::new("id", FieldType::Uuid).primary_key());
        schema.append_standard_columns();
        registry.register(schema);

        let extended = registry
            .extend(
                "memory_notes",
                vec![FieldSpec::new("mood", FieldType::String).nullable()],
            )
            .unwrap();
        assert!(extended.has_field("mood"));
        assert!(registry.get("memory_notes").unwrap().has_field("mood"));

        let err = registry
            .extend(
                "memory_notes",
                vec![FieldSpec::new("mood", FieldType::String).nullable()],
            )
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidDefinition { .. }));
    }

    #[test]
    fn require_unknown_table_errors() {
        let registry = SchemaRegistry::new("/nonexistent");
        assert!(matches!(
            registry.require("ghosts"),
            Err(SchemaError::UnknownTable(_))
        ));
    }
}
