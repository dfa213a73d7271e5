//! The seam between the middleware and a concrete database driver.

use super::query::{self, Dialect, Statement};
use crate::models::ColumnDescriptor;
use crate::{DbVaultError, Result};
use async_trait::async_trait;
use serde_json::Value;

/// Operations the middleware needs from a database connection.
///
/// Implementations hold their own pool; every method may be called
/// concurrently.
#[async_trait]
pub trait Backend: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Schema used when the caller does not name one.
    async fn default_schema(&self) -> Result<Option<String>>;

    async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<String>>;

    async fn list_views(&self, schema: Option<&str>) -> Result<Vec<String>>;

    /// Columns of `table` in declaration order.
    ///
    /// # Errors
    /// Returns `NoSuchTable` when the table does not exist.
    async fn describe_columns(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<ColumnDescriptor>>;

    /// Runs a query and returns one value per requested column for each row.
    async fn fetch(&self, statement: &Statement, columns: &[String]) -> Result<Vec<Vec<Value>>>;

    /// Executes `sql` once per parameter row inside a single transaction.
    ///
    /// Returns the total number of affected rows. On failure the transaction
    /// is rolled back and none of the rows are applied.
    async fn execute_many(&self, sql: &str, rows: &[Vec<Value>]) -> Result<u64>;

    async fn count_rows(&self, table: &str, schema: Option<&str>) -> Result<u64> {
        let statement = query::count(self.dialect(), table, schema);
        let rows = self.fetch(&statement, &["row_count".to_string()]).await?;
        rows.first()
            .and_then(|row| row.first())
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                DbVaultError::configuration(format!("Row count of '{}' returned no value", table))
            })
    }

    /// Releases pooled connections.
    async fn close(&self);
}

#[cfg(any(feature = "sqlite", feature = "mysql"))]
pub(crate) fn json_from_f64(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(any(feature = "sqlite", feature = "mysql"))]
pub(crate) fn json_from_bytes(bytes: Vec<u8>) -> Value {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Value::String(format!("base64:{}", encoded))
}

/// Bind representation for drivers that take text and cast server-side.
#[cfg(feature = "postgresql")]
pub(crate) fn text_parameter(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(all(test, feature = "postgresql"))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_parameter() {
        assert_eq!(text_parameter(&Value::Null), None);
        assert_eq!(text_parameter(&json!("x")), Some("x".to_string()));
        assert_eq!(text_parameter(&json!(1.5)), Some("1.5".to_string()));
        assert_eq!(text_parameter(&json!(true)), Some("true".to_string()));
        assert_eq!(text_parameter(&json!({"k": 1})), Some(r#"{"k":1}"#.to_string()));
    }
}
