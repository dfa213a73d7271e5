//! Per-table read and write accessors.

use super::ConnectionState;
use super::bulk::{UpdateColumns, bulk_insert, bulk_update};
use super::cache::CacheKey;
use super::filter::{FilterValue, Filters};
use super::frame::Frame;
use super::metadata::describe_table;
use super::query;
use crate::models::TableDescriptor;
use crate::{DbVaultError, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Arguments of a table read.
///
/// Identical requests against the same table are served from the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccessRequest {
    /// Maximum number of rows; all rows when `None`.
    pub rows: Option<usize>,
    /// Columns to project; all columns when `None`.
    pub columns: Option<Vec<String>>,
    pub filters: Filters,
}

impl AccessRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(mut self, rows: usize) -> Self {
        self.rows = Some(rows);
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn filter(mut self, column: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.filters.insert(column.into(), value.into());
        self
    }

    fn cache_key(&self, table: &str, schema: Option<&str>) -> Result<CacheKey> {
        let request = serde_json::to_string(&RequestKey::from(self))
            .map_err(|e| DbVaultError::serialization("encoding request", e))?;
        Ok(CacheKey {
            table: table.to_string(),
            schema: schema.map(str::to_string),
            request,
        })
    }
}

/// Cache identity of a request.
///
/// Filters keep their variant so an equality on an array value and a
/// membership test over the same values stay distinct.
#[derive(Serialize)]
struct RequestKey<'a> {
    rows: Option<usize>,
    columns: Option<&'a [String]>,
    filters: BTreeMap<&'a str, FilterKey<'a>>,
}

#[derive(Serialize)]
enum FilterKey<'a> {
    Eq(&'a Value),
    In(&'a [Value]),
}

impl<'a> From<&'a AccessRequest> for RequestKey<'a> {
    fn from(request: &'a AccessRequest) -> Self {
        Self {
            rows: request.rows,
            columns: request.columns.as_deref(),
            filters: request
                .filters
                .iter()
                .map(|(column, value)| {
                    let key = match value {
                        FilterValue::Eq(value) => FilterKey::Eq(value),
                        FilterValue::In(values) => FilterKey::In(values),
                    };
                    (column.as_str(), key)
                })
                .collect(),
        }
    }
}

/// Reads one table or view.
#[derive(Clone)]
pub struct TableAccessor {
    table: String,
    schema: Option<String>,
    state: Arc<ConnectionState>,
}

impl TableAccessor {
    pub(crate) fn new(table: String, schema: Option<String>, state: Arc<ConnectionState>) -> Self {
        Self {
            table,
            schema,
            state,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Reads rows matching `request`.
    ///
    /// Requested columns the table lacks are dropped with a warning, which
    /// is also recorded on the returned frame. Repeating a request returns
    /// the same cached frame without querying again.
    ///
    /// # Errors
    /// Returns `Disposed` after the connection closed, `NoSuchColumn` when
    /// no requested column exists or a filter names an unknown column, and
    /// propagates backend errors unchanged.
    pub async fn call(&self, request: &AccessRequest) -> Result<Arc<Frame>> {
        let backend = self.state.backend()?;
        let key = request.cache_key(&self.table, self.schema.as_deref())?;
        if let Some(frame) = self.state.cache.get(&key) {
            tracing::trace!("Cache hit for '{}'", self.table);
            return Ok(frame);
        }

        let descriptor =
            describe_table(backend.as_ref(), &self.table, self.schema.as_deref(), false).await?;
        let (columns, warnings) = resolve_columns(&descriptor, request.columns.as_deref())?;

        let statement = query::select(
            backend.dialect(),
            &descriptor,
            &columns,
            &request.filters,
            request.rows,
        )?;
        tracing::debug!("Reading '{}': {}", self.table, statement.sql);

        let rows = backend.fetch(&statement, &columns).await?;
        let frame = Frame::new(columns, rows)?.with_warnings(warnings);
        Ok(self.state.cache.insert(key, Arc::new(frame)))
    }

    /// Reads the whole table.
    ///
    /// # Errors
    /// Same as [`TableAccessor::call`].
    pub async fn all(&self) -> Result<Arc<Frame>> {
        self.call(&AccessRequest::new()).await
    }
}

impl std::fmt::Debug for TableAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableAccessor")
            .field("table", &self.table)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Picks the columns to project, warning about unknown names.
fn resolve_columns(
    descriptor: &TableDescriptor,
    requested: Option<&[String]>,
) -> Result<(Vec<String>, Vec<String>)> {
    let Some(requested) = requested else {
        return Ok((
            descriptor.columns.iter().map(|c| c.name.clone()).collect(),
            Vec::new(),
        ));
    };

    let mut valid: Vec<String> = Vec::new();
    let mut unknown: Vec<String> = Vec::new();
    for name in requested {
        if valid.contains(name) || unknown.contains(name) {
            continue;
        }
        if descriptor.has_column(name) {
            valid.push(name.clone());
        } else {
            unknown.push(name.clone());
        }
    }

    if valid.is_empty() {
        return Err(DbVaultError::no_such_column(
            descriptor.table_name.clone(),
            unknown,
        ));
    }

    let mut warnings = Vec::new();
    if !unknown.is_empty() {
        let warning =
            DbVaultError::no_such_column(descriptor.table_name.clone(), unknown).to_string();
        tracing::warn!("{}", warning);
        warnings.push(warning);
    }
    Ok((valid, warnings))
}

/// Bulk insert into one table.
#[derive(Clone)]
pub struct InsertAccessor {
    table: String,
    schema: Option<String>,
    state: Arc<ConnectionState>,
}

impl InsertAccessor {
    pub(crate) fn new(table: String, schema: Option<String>, state: Arc<ConnectionState>) -> Self {
        Self {
            table,
            schema,
            state,
        }
    }

    /// Inserts every row of `frame` and returns the number inserted.
    ///
    /// Cached reads of the table are dropped afterwards, including when a
    /// later chunk fails after earlier ones were committed.
    ///
    /// # Errors
    /// See [`bulk_insert`]; also `Disposed` after the connection closed.
    pub async fn call(&self, frame: &Frame) -> Result<u64> {
        let backend = self.state.backend()?;
        let result = bulk_insert(
            frame,
            &self.table,
            backend.as_ref(),
            self.schema.as_deref(),
            &self.state.policy,
        )
        .await;
        // Chunks committed before a failure are visible too.
        self.state
            .cache
            .invalidate_table(&self.table, self.schema.as_deref());
        result
    }
}

/// Keyed bulk update of one table.
#[derive(Clone)]
pub struct UpdateAccessor {
    table: String,
    schema: Option<String>,
    state: Arc<ConnectionState>,
}

impl UpdateAccessor {
    pub(crate) fn new(table: String, schema: Option<String>, state: Arc<ConnectionState>) -> Self {
        Self {
            table,
            schema,
            state,
        }
    }

    /// Updates rows matched on `keys`, setting `values`, from `frame`.
    ///
    /// # Errors
    /// See [`bulk_update`]; also `Disposed` after the connection closed.
    pub async fn call(
        &self,
        frame: &Frame,
        keys: impl Into<UpdateColumns>,
        values: impl Into<UpdateColumns>,
    ) -> Result<u64> {
        let backend = self.state.backend()?;
        let result = bulk_update(
            frame,
            &keys.into(),
            &values.into(),
            &self.table,
            backend.as_ref(),
            self.schema.as_deref(),
            &self.state.policy,
        )
        .await;
        self.state
            .cache
            .invalidate_table(&self.table, self.schema.as_deref());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnDescriptor, RowCount, ValueKind};

    fn descriptor() -> TableDescriptor {
        let column = |name: &str| ColumnDescriptor {
            name: name.to_string(),
            declared_type: "TEXT".to_string(),
            value_kind: ValueKind::Text,
            primary_key: false,
            nullable: true,
        };
        TableDescriptor {
            table_name: "currency".to_string(),
            schema: None,
            columns: vec![column("code"), column("name")],
            row_count: RowCount::Unavailable,
        }
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_all_columns_when_unspecified() {
        let (columns, warnings) = resolve_columns(&descriptor(), None).unwrap();
        assert_eq!(columns, names(&["code", "name"]));
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_unknown_columns_are_dropped_with_warning() {
        let requested = names(&["name", "not there", "code", "made_up", "name"]);
        let (columns, warnings) = resolve_columns(&descriptor(), Some(requested.as_slice())).unwrap();

        assert_eq!(columns, names(&["name", "code"]));
        assert_eq!(
            warnings,
            vec!["Columns [made_up, not there] are not in table currency".to_string()]
        );
    }

    #[test]
    fn test_no_valid_columns_is_an_error() {
        let requested = names(&["made_up"]);
        let err = resolve_columns(&descriptor(), Some(requested.as_slice())).unwrap_err();
        assert_eq!(err.to_string(), "Columns [made_up] are not in table currency");

        let empty: Vec<String> = Vec::new();
        let err = resolve_columns(&descriptor(), Some(empty.as_slice())).unwrap_err();
        assert!(matches!(err, DbVaultError::NoSuchColumn { .. }));
    }

    #[test]
    fn test_cache_key_distinguishes_arguments() {
        let plain = AccessRequest::new().cache_key("t", None).unwrap();
        let limited = AccessRequest::new().rows(5).cache_key("t", None).unwrap();
        let filtered = AccessRequest::new()
            .filter("a", 1)
            .filter("b", vec!["x", "y"])
            .cache_key("t", None)
            .unwrap();
        let reordered = AccessRequest::new()
            .filter("b", vec!["x", "y"])
            .filter("a", 1)
            .cache_key("t", None)
            .unwrap();

        assert_ne!(plain, limited);
        assert_ne!(plain, filtered);
        assert_eq!(filtered, reordered);
        assert_ne!(plain, AccessRequest::new().cache_key("u", None).unwrap());
    }

    #[test]
    fn test_cache_key_keeps_filter_kind() {
        let equal = AccessRequest::new()
            .filter("a", FilterValue::Eq(serde_json::json!([1, 2])))
            .cache_key("t", None)
            .unwrap();
        let member = AccessRequest::new()
            .filter("a", vec![1, 2])
            .cache_key("t", None)
            .unwrap();
        assert_ne!(equal, member);
    }
}
