//! PostgreSQL backend.
//!
//! Rows are read through `row_to_json` so every column type maps to JSON
//! without per-type decoding. Parameters are bound as text and cast to the
//! column's `udt_name` in the SQL.

use super::backend::{Backend, text_parameter};
use super::query::{Dialect, Statement};
use crate::models::{ColumnDescriptor, ValueKind};
use crate::{DbVaultError, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::Row;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

const MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// A pooled PostgreSQL database.
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// # Errors
    /// Propagates the driver error when the server cannot be reached or
    /// rejects the credentials.
    pub async fn connect(url: &str) -> Result<Self> {
        tracing::info!(
            "Connecting to PostgreSQL at {}",
            crate::error::redact_database_url(url)
        );
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .test_before_acquire(true)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn list_objects(&self, table_type: &str, schema: Option<&str>) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = COALESCE($1, current_schema()) AND table_type = $2 \
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
impl Backend for PostgresBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn default_schema(&self) -> Result<Option<String>> {
        let schema: Option<String> = sqlx::query_scalar("SELECT current_schema()::text")
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
            r#"
            SELECT
                c.column_name::text AS column_name,
                c.udt_name::text AS udt_name,
                c.is_nullable = 'YES' AS nullable,
                EXISTS (
                    SELECT 1
                    FROM information_schema.table_constraints tc
                    JOIN information_schema.key_column_usage k
                      ON tc.constraint_name = k.constraint_name
                     AND tc.table_schema = k.table_schema
                     AND tc.table_name = k.table_name
                    WHERE tc.constraint_type = 'PRIMARY KEY'
                      AND tc.table_schema = c.table_schema
                      AND tc.table_name = c.table_name
                      AND k.column_name = c.column_name
                ) AS primary_key
            FROM information_schema.columns c
            WHERE c.table_schema = COALESCE($1, current_schema())
              AND c.table_name = $2
            ORDER BY c.ordinal_position
            "#,
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
            let declared_type: String = row.try_get("udt_name")?;
            columns.push(ColumnDescriptor {
                name: row.try_get("column_name")?,
                value_kind: ValueKind::from_declared_type(&declared_type),
                declared_type,
                primary_key: row.try_get("primary_key")?,
                nullable: row.try_get("nullable")?,
            });
        }
        Ok(columns)
    }

    async fn fetch(&self, statement: &Statement, columns: &[String]) -> Result<Vec<Vec<Value>>> {
        let sql = format!("SELECT row_to_json(q.*) FROM ({}) q", statement.sql);
        let mut query = sqlx::query_scalar::<_, Value>(&sql);
        for value in &statement.params {
            query = query.bind(text_parameter(value));
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|mut row| {
                columns
                    .iter()
                    .map(|c| row.get_mut(c).map(Value::take).unwrap_or(Value::Null))
                    .collect()
            })
            .collect())
    }

    async fn execute_many(&self, sql: &str, rows: &[Vec<Value>]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut affected = 0u64;
        for row in rows {
            let mut query = sqlx::query(sql);
            for value in row {
                query = query.bind(text_parameter(value));
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
