//! MySQL backend.

use super::backend::{Backend, json_from_bytes, json_from_f64};
use super::query::{Dialect, Statement};
use crate::models::{ColumnDescriptor, ValueKind};
use crate::{DbVaultError, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::mysql::{MySql, MySqlArguments, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{MySqlPool, Row};
use std::time::Duration;

const MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// A pooled MySQL database.
#[derive(Debug, Clone)]
pub struct MySqlBackend {
    pool: MySqlPool,
}

impl MySqlBackend {
    /// # Errors
    /// Propagates the driver error when the server cannot be reached or
    /// rejects the credentials.
    pub async fn connect(url: &str) -> Result<Self> {
        tracing::info!(
            "Connecting to MySQL at {}",
            crate::error::redact_database_url(url)
        );
        let pool = MySqlPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    async fn list_objects(&self, table_type: &str, schema: Option<&str>) -> Result<Vec<String>> {
        // information_schema text columns decode as binary on some servers
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT CAST(table_name AS CHAR) FROM information_schema.tables \
             WHERE table_schema = COALESCE(?, DATABASE()) AND table_type = ? \
             ORDER BY table_name",
        )
        .bind(schema)
        .bind(table_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }
}

#[async_trait]
impl Backend for MySqlBackend {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn default_schema(&self) -> Result<Option<String>> {
        let schema: Option<String> = sqlx::query_scalar("SELECT CAST(DATABASE() AS CHAR)")
            .fetch_one(&self.pool)
            .await?;
        Ok(schema)
    }

    async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<String>> {
        self.list_objects("BASE TABLE", schema).await
    }

    async fn list_views(&self, schema: Option<&str>) -> Result<Vec<String>> {
        self.list_objects("VIEW", schema).await
    }

    async fn describe_columns(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<ColumnDescriptor>> {
        let rows = sqlx::query(
            "SELECT CAST(column_name AS CHAR) AS column_name, \
                    CAST(column_type AS CHAR) AS column_type, \
                    CAST(is_nullable AS CHAR) AS is_nullable, \
                    CAST(column_key AS CHAR) AS column_key \
             FROM information_schema.columns \
             WHERE table_schema = COALESCE(?, DATABASE()) AND table_name = ? \
             ORDER BY ordinal_position",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(DbVaultError::NoSuchTable {
                table: table.to_string(),
            });
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let declared_type: String = row.try_get("column_type")?;
            let nullable: String = row.try_get("is_nullable")?;
            let key: String = row.try_get("column_key")?;
            columns.push(ColumnDescriptor {
                name: row.try_get("column_name")?,
                value_kind: ValueKind::from_declared_type(&declared_type),
                declared_type,
                primary_key: key == "PRI",
                nullable: nullable == "YES",
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
    query: Query<'q, MySql, MySqlArguments>,
    value: &Value,
) -> Query<'q, MySql, MySqlArguments> {
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

fn extract_value(row: &MySqlRow, index: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map(Value::String).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(index) {
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
