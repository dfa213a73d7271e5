//! SQL rendering for table accessors and bulk writes.
//!
//! All identifiers are quoted for the target dialect and every value is a
//! bound parameter; nothing user-supplied is interpolated into SQL text.

use super::filter::{FilterValue, Filters};
use crate::models::{TableDescriptor, ValueKind};
use crate::{DbVaultError, Result};
use serde_json::Value;

/// SQL dialect of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
    MySql,
}

impl Dialect {
    /// Quotes an identifier, doubling embedded quote characters.
    pub fn quote_identifier(self, identifier: &str) -> String {
        match self {
            Self::MySql => format!("`{}`", identifier.replace('`', "``")),
            Self::Sqlite | Self::Postgres => format!("\"{}\"", identifier.replace('"', "\"\"")),
        }
    }

    /// `schema.table`, or just `table` without a schema.
    pub fn qualified_table(self, table: &str, schema: Option<&str>) -> String {
        match schema {
            Some(schema) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(table)
            ),
            None => self.quote_identifier(table),
        }
    }

    /// Placeholder for the 1-based parameter `index`.
    ///
    /// PostgreSQL parameters are bound as text and cast to the column's
    /// declared type when it is known.
    pub fn placeholder(self, index: usize, declared_type: Option<&str>) -> String {
        match (self, declared_type) {
            (Self::Postgres, Some(declared)) if !declared.is_empty() => {
                format!("CAST(${} AS {})", index, self.quote_identifier(declared))
            }
            (Self::Postgres, _) => format!("${}", index),
            (Self::Sqlite | Self::MySql, _) => "?".to_string(),
        }
    }

    /// Projection of one column in a SELECT list.
    ///
    /// The MySQL driver decodes DECIMAL, temporal, JSON, and ENUM/SET
    /// columns into none of the value types rows are read as, so those are
    /// read back as text under their own name.
    pub fn project(self, column: &str, kind: ValueKind) -> String {
        let quoted = self.quote_identifier(column);
        match (self, kind) {
            (
                Self::MySql,
                ValueKind::Decimal | ValueKind::Temporal | ValueKind::Json | ValueKind::Unknown,
            ) => format!("CAST({} AS CHAR) AS {}", quoted, quoted),
            _ => quoted,
        }
    }
}

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Accumulates parameters while a statement is rendered.
#[derive(Debug)]
pub struct QueryBuilder {
    dialect: Dialect,
    params: Vec<Value>,
}

impl QueryBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            params: Vec::new(),
        }
    }

    /// Records `value` and returns its placeholder.
    pub fn bind(&mut self, value: Value, declared_type: Option<&str>) -> String {
        self.params.push(value);
        self.dialect.placeholder(self.params.len(), declared_type)
    }

    pub fn quote(&self, identifier: &str) -> String {
        self.dialect.quote_identifier(identifier)
    }

    pub fn finish(self, sql: String) -> Statement {
        Statement {
            sql,
            params: self.params,
        }
    }
}

/// Renders `SELECT <columns> FROM <table> [WHERE ...] [LIMIT n]`.
///
/// # Errors
/// Returns `NoSuchColumn` if a filter names a column the table lacks.
pub fn select(
    dialect: Dialect,
    descriptor: &TableDescriptor,
    columns: &[String],
    filters: &Filters,
    limit: Option<usize>,
) -> Result<Statement> {
    let mut builder = QueryBuilder::new(dialect);

    let projection = columns
        .iter()
        .map(|name| {
            let kind = descriptor
                .columns
                .iter()
                .find(|c| &c.name == name)
                .map_or(ValueKind::Unknown, |c| c.value_kind);
            dialect.project(name, kind)
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!(
        "SELECT {} FROM {}",
        projection,
        dialect.qualified_table(&descriptor.table_name, descriptor.schema.as_deref())
    );

    if let Some(predicate) = where_clause(&mut builder, descriptor, filters)? {
        sql.push_str(" WHERE ");
        sql.push_str(&predicate);
    }

    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    Ok(builder.finish(sql))
}

/// Renders `SELECT COUNT(*) AS row_count FROM <table>`.
pub fn count(dialect: Dialect, table: &str, schema: Option<&str>) -> Statement {
    Statement {
        sql: format!(
            "SELECT COUNT(*) AS row_count FROM {}",
            dialect.qualified_table(table, schema)
        ),
        params: Vec::new(),
    }
}

/// Renders a single-row `INSERT` with one parameter per column.
///
/// `columns` pairs each column name with its declared type.
pub fn insert(
    dialect: Dialect,
    table: &str,
    schema: Option<&str>,
    columns: &[(&str, Option<&str>)],
) -> String {
    let names = columns
        .iter()
        .map(|(name, _)| dialect.quote_identifier(name))
        .collect::<Vec<_>>()
        .join(", ");
    let values = columns
        .iter()
        .enumerate()
        .map(|(i, (_, declared))| dialect.placeholder(i.saturating_add(1), *declared))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        dialect.qualified_table(table, schema),
        names,
        values
    )
}

/// Renders `UPDATE <table> SET v = ?, ... WHERE k = ? AND ...`.
///
/// Parameters are ordered SET values first, then WHERE keys.
pub fn update(
    dialect: Dialect,
    table: &str,
    schema: Option<&str>,
    set_columns: &[(&str, Option<&str>)],
    key_columns: &[(&str, Option<&str>)],
) -> String {
    let mut index = 0usize;
    let mut next = |declared: Option<&str>| {
        index = index.saturating_add(1);
        dialect.placeholder(index, declared)
    };

    let assignments = set_columns
        .iter()
        .map(|(name, declared)| format!("{} = {}", dialect.quote_identifier(name), next(*declared)))
        .collect::<Vec<_>>()
        .join(", ");
    let conditions = key_columns
        .iter()
        .map(|(name, declared)| format!("{} = {}", dialect.quote_identifier(name), next(*declared)))
        .collect::<Vec<_>>()
        .join(" AND ");

    format!(
        "UPDATE {} SET {} WHERE {}",
        dialect.qualified_table(table, schema),
        assignments,
        conditions
    )
}

/// Translates equality/membership filters into a predicate.
///
/// A scalar compares with `=` (`IS NULL` for null), a sequence with `IN`;
/// an empty sequence matches nothing. Multiple filters are joined with AND.
///
/// # Errors
/// Returns `NoSuchColumn` naming every filter column the table lacks.
pub fn where_clause(
    builder: &mut QueryBuilder,
    descriptor: &TableDescriptor,
    filters: &Filters,
) -> Result<Option<String>> {
    if filters.is_empty() {
        return Ok(None);
    }

    let unknown: Vec<String> = filters
        .keys()
        .filter(|name| !descriptor.has_column(name))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(DbVaultError::no_such_column(
            descriptor.table_name.clone(),
            unknown,
        ));
    }

    let mut clauses = Vec::with_capacity(filters.len());
    for (column, value) in filters {
        let declared = descriptor
            .columns
            .iter()
            .find(|c| &c.name == column)
            .map(|c| c.declared_type.as_str());
        let quoted = builder.quote(column);

        let clause = match value {
            FilterValue::Eq(Value::Null) => format!("{} IS NULL", quoted),
            FilterValue::Eq(scalar) => {
                format!("{} = {}", quoted, builder.bind(scalar.clone(), declared))
            }
            FilterValue::In(values) if values.is_empty() => "1 = 0".to_string(),
            FilterValue::In(values) => {
                let placeholders = values
                    .iter()
                    .map(|v| builder.bind(v.clone(), declared))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{} IN ({})", quoted, placeholders)
            }
        };
        clauses.push(clause);
    }

    Ok(Some(clauses.join(" AND ")))
}
