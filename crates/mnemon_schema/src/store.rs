//! SQLite-backed table store.
//!
//! Materializes the registry's definitions (`CREATE TABLE IF NOT EXISTS`)
//! and provides typed CRUD over them. Table and column names are validated
//! identifiers at load time, so interpolating them into SQL is safe; all
//! values go through binds.

use crate::def::{FieldSpec, FieldType, TableSchema};
use crate::registry::SchemaRegistry;
use crate::value::{validate_insert, validate_patch, Row, Value};
use crate::{Result, SchemaError};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row as _, Sqlite};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Options for `query`: equality filters, paging, ordering.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub filters: Option<serde_json::Map<String, serde_json::Value>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub order_by: Option<String>,
}

impl QueryOptions {
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
        self.filters
            .get_or_insert_with(serde_json::Map::new)
            .insert(field.into(), value);
        self
    }
}

/// The structured memory store: one SQLite file, one table per schema.
pub struct TableStore {
    pool: Pool<Sqlite>,
    registry: Arc<SchemaRegistry>,
}

impl TableStore {
    pub fn new(pool: Pool<Sqlite>, registry: Arc<SchemaRegistry>) -> Self {
        Self { pool, registry }
    }

    /// Open an in-memory store (for tests).
    pub async fn in_memory(registry: Arc<SchemaRegistry>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await?;
        Ok(Self::new(pool, registry))
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Create storage for every cached schema. Safe to call repeatedly.
    pub async fn materialize(&self) -> Result<()> {
        for table in self.registry.list() {
            let schema = self.registry.require(&table)?;
            self.materialize_table(&schema).await?;
        }
        info!("Materialized {} tables", self.registry.len());
        Ok(())
    }

    async fn materialize_table(&self, schema: &TableSchema) -> Result<()> {
        let mut columns: Vec<String> = Vec::with_capacity(schema.fields.len());
        for field in &schema.fields {
            let mut column = format!("{} {}", field.name, field.field_type.sql_type());
            if field.primary_key {
                column.push_str(" PRIMARY KEY");
            }
            columns.push(column);
        }
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            schema.table_name,
            columns.join(", ")
        );
        sqlx::query(&ddl).execute(&self.pool).await?;

        if let Some(fp) = schema.fingerprint_field() {
            let index = format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_{}_{} ON {}({})",
                schema.table_name, fp.name, schema.table_name, fp.name
            );
            sqlx::query(&index).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Add columns to a materialized table (governed extension path).
    pub async fn add_columns(&self, table: &str, fields: &[FieldSpec]) -> Result<()> {
        // ALTER runs against the already-extended registry shape, so the
        // names have been through identifier validation.
        for field in fields {
            let ddl = format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                table,
                field.name,
                field.field_type.sql_type()
            );
            sqlx::query(&ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Validate and insert a row, returning it with generated fields set.
    ///
    /// With `upsert` and a fingerprint-bearing table, an existing row with
    /// the same fingerprint is updated in place and keeps its primary key
    /// and `created_at` - find-by-fingerprint then update-or-insert, all
    /// inside one transaction.
    pub async fn insert(&self, table: &str, data: &serde_json::Value, upsert: bool) -> Result<Row> {
        let schema = self.registry.require(table)?;
        let mut row = validate_insert(&schema, data)?;

        let mut tx = self.pool.begin().await?;

        if upsert {
            if let Some(fp_field) = schema.fingerprint_field() {
                if let Some(fp_value) = row.get(&fp_field.name).filter(|v| !v.is_empty()).cloned() {
                    let existing = self
                        .fetch_by_field_tx(&mut tx, &schema, &fp_field.name, &fp_value)
                        .await?;
                    if let Some(existing) = existing {
                        let pk = schema.primary_key().name.clone();
                        // Keep identity and creation time of the original row.
                        if let Some(v) = existing.get(&pk) {
                            row.set(pk.clone(), v.clone());
                        }
                        if let Some(v) = existing.get("created_at") {
                            row.set("created_at", v.clone());
                        }
                        self.update_all_tx(&mut tx, &schema, &row).await?;
                        tx.commit().await?;
                        debug!("Upserted row into {} by {}", table, fp_field.name);
                        return Ok(row);
                    }
                }
            }
        }

        let columns: Vec<&str> = row.values.keys().map(String::as_str).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for value in row.values.values() {
            query = bind_param(query, to_param(value)?);
        }
        query.execute(&mut *tx).await?;
        tx.commit().await?;

        debug!("Inserted row into {}", table);
        Ok(row)
    }

    /// Equality-filtered query with stable insertion order by default.
    pub async fn query(&self, table: &str, opts: QueryOptions) -> Result<Vec<Row>> {
        let schema = self.registry.require(table)?;

        let mut sql = format!("SELECT * FROM {}", table);
        let mut params: Vec<SqlParam> = Vec::new();

        if let Some(filters) = &opts.filters {
            let mut clauses = Vec::new();
            for (name, raw) in filters {
                let field = schema.field(name).ok_or_else(|| SchemaError::Validation {
                    table: table.to_string(),
                    fields: vec![name.clone()],
                    message: "unknown filter column".to_string(),
                })?;
                let value = Value::coerce(field.field_type, raw).map_err(|msg| {
                    SchemaError::Validation {
                        table: table.to_string(),
                        fields: vec![name.clone()],
                        message: msg,
                    }
                })?;
                clauses.push(format!("{} = ?", name));
                params.push(to_param(&value)?);
            }
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
        }

        match &opts.order_by {
            Some(order) if schema.has_field(order) => {
                sql.push_str(&format!(" ORDER BY {}", order));
            }
            Some(order) => {
                return Err(SchemaError::Validation {
                    table: table.to_string(),
                    fields: vec![order.clone()],
                    message: "unknown order column".to_string(),
                });
            }
            // Insertion order within the table, stable across calls.
            None => sql.push_str(" ORDER BY rowid"),
        }

        if let Some(limit) = opts.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
            if let Some(offset) = opts.offset {
                sql.push_str(&format!(" OFFSET {}", offset));
            }
        }

        let mut query = sqlx::query(&sql);
        for param in params {
            query = bind_param(query, param);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(|r| decode_row(&schema, r)).collect()
    }

    /// Partial update by primary key. Returns `false` when no row matches.
    pub async fn update(&self, table: &str, id: &str, patch: &serde_json::Value) -> Result<bool> {
        let schema = self.registry.require(table)?;

        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(SchemaError::InvalidId("empty id".to_string()));
        }
        let parsed =
            Uuid::parse_str(trimmed).map_err(|_| SchemaError::InvalidId(trimmed.to_string()))?;

        let values = validate_patch(&schema, patch)?;
        if values.is_empty() {
            return Err(SchemaError::Validation {
                table: table.to_string(),
                fields: vec![],
                message: "empty patch".to_string(),
            });
        }

        let assignments: Vec<String> = values.keys().map(|k| format!("{} = ?", k)).collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            table,
            assignments.join(", "),
            schema.primary_key().name
        );

        let mut query = sqlx::query(&sql);
        for value in values.values() {
            query = bind_param(query, to_param(value)?);
        }
        query = bind_param(query, SqlParam::Text(parsed.to_string()));

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fetch one row by primary key.
    pub async fn get(&self, table: &str, id: &str) -> Result<Option<Row>> {
        let schema = self.registry.require(table)?;
        let trimmed = id.trim();
        let parsed =
            Uuid::parse_str(trimmed).map_err(|_| SchemaError::InvalidId(trimmed.to_string()))?;

        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?",
            table,
            schema.primary_key().name
        );
        let row = sqlx::query(&sql)
            .bind(parsed.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode_row(&schema, &r)).transpose()
    }

    /// Probe for a row by its logical fingerprint.
    pub async fn find_by_fingerprint(&self, table: &str, value: &str) -> Result<Option<Row>> {
        let schema = self.registry.require(table)?;
        let Some(fp_field) = schema.fingerprint_field() else {
            return Ok(None);
        };
        let sql = format!("SELECT * FROM {} WHERE {} = ?", table, fp_field.name);
        let row = sqlx::query(&sql)
            .bind(value.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode_row(&schema, &r)).transpose()
    }

    pub async fn count(&self, table: &str) -> Result<u64> {
        self.registry.require(table)?;
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn fetch_by_field_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        schema: &TableSchema,
        field: &str,
        value: &Value,
    ) -> Result<Option<Row>> {
        let sql = format!("SELECT * FROM {} WHERE {} = ?", schema.table_name, field);
        let query = bind_param(sqlx::query(&sql), to_param(value)?);
        let row = query.fetch_optional(&mut **tx).await?;
        row.map(|r| decode_row(schema, &r)).transpose()
    }

    async fn update_all_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        schema: &TableSchema,
        row: &Row,
    ) -> Result<()> {
        let pk = &schema.primary_key().name;
        let assignments: Vec<String> = row
            .values
            .keys()
            .filter(|k| k.as_str() != pk)
            .map(|k| format!("{} = ?", k))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            schema.table_name,
            assignments.join(", "),
            pk
        );
        let mut query = sqlx::query(&sql);
        for (name, value) in &row.values {
            if name == pk {
                continue;
            }
            query = bind_param(query, to_param(value)?);
        }
        let pk_value = row
            .get(pk)
            .cloned()
            .ok_or_else(|| SchemaError::InvalidId("row has no primary key".to_string()))?;
        query = bind_param(query, to_param(&pk_value)?);
        query.execute(&mut **tx).await?;
        Ok(())
    }
}

/// Owned SQL parameter, one of SQLite's storage classes.
enum SqlParam {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

fn to_param(value: &Value) -> Result<SqlParam> {
    Ok(match value {
        Value::Null => SqlParam::Null,
        Value::Boolean(b) => SqlParam::Int(i64::from(*b)),
        Value::Integer(i) => SqlParam::Int(*i),
        Value::Float(f) => SqlParam::Real(*f),
        Value::Text(s) => SqlParam::Text(s.clone()),
        Value::Uuid(u) => SqlParam::Text(u.to_string()),
        Value::DateTime(dt) => SqlParam::Text(dt.to_rfc3339()),
        Value::Json(v) => SqlParam::Text(serde_json::to_string(v)?),
    })
}

fn bind_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    param: SqlParam,
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match param {
        SqlParam::Null => query.bind(Option::<String>::None),
        SqlParam::Int(i) => query.bind(i),
        SqlParam::Real(f) => query.bind(f),
        SqlParam::Text(s) => query.bind(s),
    }
}

/// Decode a SQLite row against a schema. Lenient: columns missing from
/// the result set become Null so old readers survive extended tables.
fn decode_row(schema: &TableSchema, raw: &SqliteRow) -> Result<Row> {
    let mut row = Row::new(&schema.table_name);

    for field in &schema.fields {
        let name = field.name.as_str();
        let value = match field.field_type {
            FieldType::Integer => match try_column::<i64>(raw, name)? {
                Some(i) => Value::Integer(i),
                None => Value::Null,
            },
            FieldType::Boolean => match try_column::<i64>(raw, name)? {
                Some(i) => Value::Boolean(i != 0),
                None => Value::Null,
            },
            FieldType::Float => match try_column::<f64>(raw, name)? {
                Some(f) => Value::Float(f),
                None => Value::Null,
            },
            FieldType::Uuid => match try_column::<String>(raw, name)? {
                Some(s) => Uuid::parse_str(&s).map(Value::Uuid).unwrap_or(Value::Text(s)),
                None => Value::Null,
            },
            FieldType::String | FieldType::Text => match try_column::<String>(raw, name)? {
                Some(s) => Value::Text(s),
                None => Value::Null,
            },
            FieldType::Datetime => match try_column::<String>(raw, name)? {
                Some(s) => DateTime::parse_from_rfc3339(&s)
                    .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
                    .unwrap_or(Value::Text(s)),
                None => Value::Null,
            },
            FieldType::Json => match try_column::<String>(raw, name)? {
                Some(s) => serde_json::from_str(&s).map(Value::Json).unwrap_or(Value::Text(s)),
                None => Value::Null,
            },
        };
        row.set(name.to_string(), value);
    }

    Ok(row)
}

fn try_column<'r, T>(raw: &'r SqliteRow, name: &str) -> Result<Option<T>>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    match raw.try_get::<Option<T>, _>(name) {
        Ok(v) => Ok(v),
        Err(sqlx::Error::ColumnNotFound(_)) => Ok(None),
        Err(e) => Err(SchemaError::Database(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::{FieldSpec, FieldType};

    async fn doc_store() -> TableStore {
        let registry = Arc::new(SchemaRegistry::new("/nonexistent"));
        let mut schema = TableSchema::new("memory_documents")
            .with_description("Ingested documents")
            .with_field(FieldSpec::new("id", FieldType::Uuid).primary_key())
            .with_field(FieldSpec::new("title", FieldType::String).required())
            .with_field(
                FieldSpec::new("file_path", FieldType::String)
                    .required()
                    .fingerprint(),
            )
            .with_field(
                FieldSpec::new("token_count", FieldType::Integer)
                    .with_default(serde_json::json!(0)),
            )
            .with_field(FieldSpec::new("key_topics", FieldType::Json).nullable());
        schema.append_standard_columns();
        schema.validate().unwrap();
        registry.register(schema);

        let store = TableStore::in_memory(registry).await.unwrap();
        store.materialize().await.unwrap();
        store
    }

    #[tokio::test]
    async fn materialize_is_repeatable() {
        let store = doc_store().await;
        store.materialize().await.unwrap();
        store.materialize().await.unwrap();
    }

    #[tokio::test]
    async fn insert_and_query_round_trip() {
        let store = doc_store().await;
        let inserted = store
            .insert(
                "memory_documents",
                &serde_json::json!({
                    "title": "Alpha",
                    "file_path": "/tmp/a.txt",
                    "key_topics": ["intro"]
                }),
                false,
            )
            .await
            .unwrap();
        assert!(inserted.id().is_some());

        let rows = store
            .query("memory_documents", QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_str("title"), Some("Alpha"));
        assert_eq!(rows[0].get_i64("token_count"), Some(0));
        assert_eq!(
            rows[0].get_json("key_topics"),
            Some(&serde_json::json!(["intro"]))
        );
    }

    #[tokio::test]
    async fn insert_unknown_table_errors() {
        let store = doc_store().await;
        let err = store
            .insert("ghosts", &serde_json::json!({}), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownTable(_)));
    }

    #[tokio::test]
    async fn upsert_by_fingerprint_keeps_primary_key() {
        let store = doc_store().await;
        let first = store
            .insert(
                "memory_documents",
                &serde_json::json!({"title": "Alpha", "file_path": "/tmp/a.txt"}),
                true,
            )
            .await
            .unwrap();
        let second = store
            .insert(
                "memory_documents",
                &serde_json::json!({"title": "Alpha v2", "file_path": "/tmp/a.txt"}),
                true,
            )
            .await
            .unwrap();

        assert_eq!(first.id(), second.id());
        let rows = store
            .query("memory_documents", QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_str("title"), Some("Alpha v2"));
    }

    #[tokio::test]
    async fn query_filters_and_ordering() {
        let store = doc_store().await;
        for (title, path, tokens) in [("B", "/b", 2), ("A", "/a", 1), ("C", "/c", 3)] {
            store
                .insert(
                    "memory_documents",
                    &serde_json::json!({"title": title, "file_path": path, "token_count": tokens}),
                    false,
                )
                .await
                .unwrap();
        }

        // Default order is insertion order.
        let rows = store
            .query("memory_documents", QueryOptions::default())
            .await
            .unwrap();
        let titles: Vec<_> = rows.iter().map(|r| r.get_str("title").unwrap()).collect();
        assert_eq!(titles, vec!["B", "A", "C"]);

        // Explicit order by a schema column.
        let rows = store
            .query(
                "memory_documents",
                QueryOptions {
                    order_by: Some("title".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let titles: Vec<_> = rows.iter().map(|r| r.get_str("title").unwrap()).collect();
        assert_eq!(titles, vec!["A", "B", "C"]);

        // Equality filter.
        let rows = store
            .query(
                "memory_documents",
                QueryOptions::default().with_filter("title", serde_json::json!("A")),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        // Limit + offset.
        let rows = store
            .query(
                "memory_documents",
                QueryOptions {
                    limit: Some(1),
                    offset: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_str("title"), Some("A"));
    }

    #[tokio::test]
    async fn update_validates_id() {
        let store = doc_store().await;
        assert!(matches!(
            store
                .update("memory_documents", "", &serde_json::json!({"title": "x"}))
                .await,
            Err(SchemaError::InvalidId(_))
        ));
        assert!(matches!(
            store
                .update(
                    "memory_documents",
                    "not-a-uuid",
                    &serde_json::json!({"title": "x"})
                )
                .await,
            Err(SchemaError::InvalidId(_))
        ));
    }

    #[tokio::test]
    async fn update_missing_row_returns_false() {
        let store = doc_store().await;
        let ok = store
            .update(
                "memory_documents",
                &Uuid::new_v4().to_string(),
                &serde_json::json!({"title": "x"}),
            )
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn update_patches_row() {
        let store = doc_store().await;
        let row = store
            .insert(
                "memory_documents",
                &serde_json::json!({"title": "Alpha", "file_path": "/a"}),
                false,
            )
            .await
            .unwrap();
        let id = row.id().unwrap();

        let ok = store
            .update(
                "memory_documents",
                &id,
                &serde_json::json!({"trust_score": 0.9}),
            )
            .await
            .unwrap();
        assert!(ok);

        let fetched = store.get("memory_documents", &id).await.unwrap().unwrap();
        assert_eq!(fetched.trust_score(), 0.9);
    }

    #[tokio::test]
    async fn find_by_fingerprint_probe() {
        let store = doc_store().await;
        assert!(store
            .find_by_fingerprint("memory_documents", "/tmp/a.txt")
            .await
            .unwrap()
            .is_none());

        store
            .insert(
                "memory_documents",
                &serde_json::json!({"title": "Alpha", "file_path": "/tmp/a.txt"}),
                false,
            )
            .await
            .unwrap();

        let found = store
            .find_by_fingerprint("memory_documents", "/tmp/a.txt")
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn extension_adds_column_and_old_rows_read_null() {
        let store = doc_store().await;
        store
            .insert(
                "memory_documents",
                &serde_json::json!({"title": "Alpha", "file_path": "/a"}),
                false,
            )
            .await
            .unwrap();

        let new_field = FieldSpec::new("language", FieldType::String).nullable();
        store
            .registry()
            .extend("memory_documents", vec![new_field.clone()])
            .unwrap();
        store
            .add_columns("memory_documents", &[new_field])
            .await
            .unwrap();

        let rows = store
            .query("memory_documents", QueryOptions::default())
            .await
            .unwrap();
        assert!(rows[0].get("language").unwrap().is_null());
    }
}
