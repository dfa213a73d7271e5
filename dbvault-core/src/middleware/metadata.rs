//! Table metadata lookups.

use super::ConnectionState;
use super::backend::Backend;
use crate::Result;
use crate::models::{RowCount, TableDescriptor};
use std::sync::Arc;

/// Metadata accessor for one table.
#[derive(Clone)]
pub struct TableMetadata {
    table: String,
    schema: Option<String>,
    state: Arc<ConnectionState>,
}

impl TableMetadata {
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

    /// Describes the table's columns and counts its rows.
    ///
    /// A failing count is reported as [`RowCount::Unavailable`] rather than
    /// an error.
    ///
    /// # Errors
    /// Returns `Disposed` after the connection closed, `NoSuchTable` if the
    /// table disappeared, and propagates backend errors.
    pub async fn describe(&self) -> Result<TableDescriptor> {
        let backend = self.state.backend()?;
        describe_table(backend.as_ref(), &self.table, self.schema.as_deref(), true).await
    }
}

impl std::fmt::Debug for TableMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableMetadata")
            .field("table", &self.table)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

pub(crate) async fn describe_table(
    backend: &dyn Backend,
    table: &str,
    schema: Option<&str>,
    with_count: bool,
) -> Result<TableDescriptor> {
    let columns = backend.describe_columns(table, schema).await?;

    let row_count = if with_count {
        match backend.count_rows(table, schema).await {
            Ok(count) => RowCount::Known(count),
            Err(e) => {
                tracing::warn!("Could not count rows of '{}': {}", table, e);
                RowCount::Unavailable
            }
        }
    } else {
        RowCount::Unavailable
    };

    Ok(TableDescriptor {
        table_name: table.to_string(),
        schema: schema.map(str::to_string),
        columns,
        row_count,
    })
}
