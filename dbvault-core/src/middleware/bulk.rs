//! Chunked bulk insert and keyed bulk update.

use super::backend::Backend;
use super::frame::Frame;
use super::query;
use crate::models::ColumnDescriptor;
use crate::{DbVaultError, Result};
use serde_json::{Map, Value};
use std::time::Duration;

/// Rows sent per transaction.
pub const CHUNK_SIZE: usize = 30_000;

/// Pause before the single retry of a chunk.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// How bulk writes are split and retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePolicy {
    pub chunk_size: usize,
    pub retry_delay: Duration,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            retry_delay: RETRY_DELAY,
        }
    }
}

impl WritePolicy {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

/// Column selection for a bulk update.
///
/// `Names` uses the same name in the frame and the table; `Mapping` pairs a
/// table column with the frame column that supplies its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateColumns {
    Names(Vec<String>),
    Mapping(Vec<(String, String)>),
}

impl UpdateColumns {
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Names(names.into_iter().map(Into::into).collect())
    }

    /// `(table column, frame column)` pairs.
    pub fn mapping<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Mapping(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Names(names) => names.is_empty(),
            Self::Mapping(pairs) => pairs.is_empty(),
        }
    }

    /// `(table column, frame column)` pairs in order.
    fn pairs(&self) -> Vec<(&str, &str)> {
        match self {
            Self::Names(names) => names.iter().map(|n| (n.as_str(), n.as_str())).collect(),
            Self::Mapping(pairs) => pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect(),
        }
    }
}

impl<S: Into<String>> From<Vec<S>> for UpdateColumns {
    fn from(names: Vec<S>) -> Self {
        Self::names(names)
    }
}

/// Inserts every frame row into `table`, one transaction per chunk.
///
/// Returns the number of rows inserted. An empty frame writes nothing.
///
/// # Errors
/// Returns `NoSuchColumn` if the frame has columns the table lacks, and
/// `Operational` when a chunk fails (transient failures are retried once).
pub async fn bulk_insert(
    frame: &Frame,
    table: &str,
    backend: &dyn Backend,
    schema: Option<&str>,
    policy: &WritePolicy,
) -> Result<u64> {
    if frame.is_empty() {
        tracing::debug!("Nothing to insert into '{}'", table);
        return Ok(0);
    }

    let described = backend.describe_columns(table, schema).await?;
    let columns = typed_columns(table, &described, frame.columns().iter().map(String::as_str))?;
    let sql = query::insert(backend.dialect(), table, schema, &columns);

    tracing::info!(
        "Inserting {} rows into '{}' in chunks of {}",
        frame.shape().0,
        table,
        policy.chunk_size
    );
    run_chunked(
        &format!("Bulk insert into {}", table),
        backend,
        &sql,
        frame.rows(),
        frame.columns(),
        policy,
    )
    .await
}

/// Updates `table` from the frame, matching rows on `keys` and setting
/// `values`.
///
/// Both selections must be the same shape (both names or both mappings).
/// Returns the number of rows the backend reports as affected.
///
/// # Errors
/// Returns `BadArgumentType` for mismatched or empty selections or for
/// selected columns missing from the frame, `NoSuchColumn` for table
/// columns that do not exist, and `Operational` when a chunk fails.
pub async fn bulk_update(
    frame: &Frame,
    keys: &UpdateColumns,
    values: &UpdateColumns,
    table: &str,
    backend: &dyn Backend,
    schema: Option<&str>,
    policy: &WritePolicy,
) -> Result<u64> {
    match (keys, values) {
        (UpdateColumns::Names(_), UpdateColumns::Names(_))
        | (UpdateColumns::Mapping(_), UpdateColumns::Mapping(_)) => {}
        _ => {
            return Err(DbVaultError::bad_argument(
                "Key and value columns must both be lists or both be mappings",
            ));
        }
    }
    if keys.is_empty() || values.is_empty() {
        return Err(DbVaultError::bad_argument(
            "Bulk update needs at least one key column and one value column",
        ));
    }
    if frame.is_empty() {
        tracing::debug!("Nothing to update in '{}'", table);
        return Ok(0);
    }

    let key_pairs = keys.pairs();
    let value_pairs = values.pairs();

    // Parameter order: SET values, then WHERE keys.
    let mut sources = Vec::with_capacity(key_pairs.len().saturating_add(value_pairs.len()));
    for (_, source) in value_pairs.iter().chain(key_pairs.iter()) {
        let index = frame.column_index(source).ok_or_else(|| {
            DbVaultError::bad_argument(format!("Column '{}' is not in the input data", source))
        })?;
        sources.push(index);
    }

    let described = backend.describe_columns(table, schema).await?;
    let set_columns = typed_columns(table, &described, value_pairs.iter().map(|(t, _)| *t))?;
    let key_columns = typed_columns(table, &described, key_pairs.iter().map(|(t, _)| *t))?;
    let sql = query::update(backend.dialect(), table, schema, &set_columns, &key_columns);

    let rows: Vec<Vec<Value>> = frame
        .rows()
        .iter()
        .map(|row| {
            sources
                .iter()
                .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    let labels: Vec<String> = value_pairs
        .iter()
        .chain(key_pairs.iter())
        .map(|(_, source)| (*source).to_string())
        .collect();

    tracing::info!(
        "Updating '{}' from {} rows in chunks of {}",
        table,
        rows.len(),
        policy.chunk_size
    );
    run_chunked(
        &format!("Bulk update of {}", table),
        backend,
        &sql,
        &rows,
        &labels,
        policy,
    )
    .await
}

/// Pairs each requested column with its declared type.
fn typed_columns<'a>(
    table: &str,
    described: &'a [ColumnDescriptor],
    names: impl Iterator<Item = &'a str>,
) -> Result<Vec<(&'a str, Option<&'a str>)>> {
    let mut columns = Vec::new();
    let mut unknown = Vec::new();
    for name in names {
        match described.iter().find(|c| c.name == name) {
            Some(column) => columns.push((name, Some(column.declared_type.as_str()))),
            None => unknown.push(name.to_string()),
        }
    }

    if unknown.is_empty() {
        Ok(columns)
    } else {
        Err(DbVaultError::no_such_column(table, unknown))
    }
}

async fn run_chunked(
    operation: &str,
    backend: &dyn Backend,
    sql: &str,
    rows: &[Vec<Value>],
    labels: &[String],
    policy: &WritePolicy,
) -> Result<u64> {
    let chunk_size = policy.chunk_size.max(1);
    let mut affected = 0u64;
    let mut completed = 0u64;
    let mut last_successful: Option<&Vec<Value>> = None;

    for (index, chunk) in rows.chunks(chunk_size).enumerate() {
        let result = match backend.execute_many(sql, chunk).await {
            Err(error) if error.is_transient() => {
                tracing::warn!(
                    "{} chunk {} failed ({}), retrying in {:?}",
                    operation,
                    index,
                    error,
                    policy.retry_delay
                );
                tokio::time::sleep(policy.retry_delay).await;
                backend.execute_many(sql, chunk).await
            }
            other => other,
        };

        match result {
            Ok(count) => {
                affected = affected.saturating_add(count);
                completed = completed.saturating_add(chunk.len() as u64);
                last_successful = chunk.last();
                tracing::debug!("{}: {} rows written", operation, completed);
            }
            Err(error) => {
                let last_successful = last_successful.map(|row| describe_row(labels, row));
                tracing::error!(
                    "{} aborted after {} rows; last successful row: {}",
                    operation,
                    completed,
                    last_successful.as_deref().unwrap_or("none")
                );
                return Err(DbVaultError::Operational {
                    operation: operation.to_string(),
                    rows_completed: completed,
                    last_successful,
                    source: Box::new(error),
                });
            }
        }
    }

    Ok(affected)
}

fn describe_row(labels: &[String], row: &[Value]) -> String {
    let object: Map<String, Value> = labels.iter().cloned().zip(row.iter().cloned()).collect();
    Value::Object(object).to_string()
}
