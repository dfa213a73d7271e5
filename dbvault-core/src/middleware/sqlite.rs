//! SQLite backend.
//!
//! Tables and views come from `sqlite_master`, columns from
//! `PRAGMA table_info`. Schemas are attached database names.

use super::backend::{Backend, json_from_bytes, json_from_f64};
use super::query::{Dialect, Statement};
use crate::models::{ColumnDescriptor, ValueKind};
use crate::{DbVaultError, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// A pooled SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Opens a database file, or a private in-memory database for `:memory:`.
    ///
    /// The pool holds a single connection that is never recycled, so an
    /// in-memory database lives as long as the backend.
    ///
    /// # Errors
    /// Propagates the driver error when the file cannot be opened.
    pub async fn connect(path: &str) -> Result<Self> {
        let options = if path == ":memory:" || path.is_empty() {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new().filename(path)
        };

        tracing::debug!("Opening SQLite database {}", path);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn list_objects(&self, kind: &str, schema: Option<&str>) -> Result<Vec<String>> {
        let master = match schema {
            Some(schema) => format!("{}.sqlite_master", Dialect::Sqlite.quote_identifier(schema)),
            None => "sqlite_master".to_string(),
        };
        let sql = format!(
            "SELECT name FROM {} WHERE type = ? AND name NOT LIKE 'sqlite_%' ORDER BY name",
            master
        );

        let rows = sqlx::query(&sql).bind(kind).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(DbVaultError::from))
            .collect()
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn default_schema(&self) -> Result<Option<String>> {
        Ok(None)
    }

    async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<String>> {
        self.list_objects("table", schema).await
    }

    async fn list_views(&self, schema: Option<&str>) -> Result<Vec<String>> {
        self.list_objects("view", schema).await
    }

    async fn describe_columns(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<ColumnDescriptor>> {
        // PRAGMA arguments cannot be bound
        let prefix = schema
            .map(|s| format!("{}.", Dialect::Sqlite.quote_identifier(s)))
            .unwrap_or_default();
        let sql = format!(
            "PRAGMA {}table_info('{}')",
            prefix,
            table.replace('\'', "''")
        );

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        if rows.is_empty() {
            return Err(DbVaultError::NoSuchTable {
                table: table.to_string(),
            });
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get("name")?;
            let declared_type: String = row.try_get("type")?;
            let not_null: i64 = row.try_get("notnull")?;
            let pk: i64 = row.try_get("pk")?;

            columns.push(ColumnDescriptor {
                value_kind: ValueKind::from_declared_type(&declared_type),
                name,
                declared_type,
                primary_key: pk > 0,
                nullable: not_null == 0 && pk == 0,
            });
        }
        Ok(columns)
    }

    async fn fetch(&self, statement: &Statement, columns: &[String]) -> Result<Vec<Vec<Value>>> {
        let mut query = sqlx::query(&statement.sql);
        for value in &statement.params {
            query = bind_value(query, value);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| (0..columns.len()).map(|i| extract_value(row, i)).collect())
            .collect())
    }

    async fn execute_many(&self, sql: &str, rows: &[Vec<Value>]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut affected = 0u64;
        for row in rows {
            let mut query = sqlx::query(sql);
            for value in row {
                query = bind_value(query, value);
            }
            affected = affected.saturating_add(query.execute(&mut *tx).await?.rows_affected());
        }
        tx.commit().await?;
        Ok(affected)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => query.bind(i),
            (None, Some(f)) => query.bind(f),
            (None, None) => query.bind(n.to_string()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

/// SQLite is dynamically typed, so each value is probed in turn.
fn extract_value(row: &SqliteRow, index: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map(Value::String).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v.map(json_from_f64).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return v.map(Value::Bool).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return v.map(json_from_bytes).unwrap_or(Value::Null);
    }
    Value::Null
}
