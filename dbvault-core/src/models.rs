//! Data structures shared by the vault, the middleware, and the registry.
//!
//! The persisted documents are plain nested JSON objects keyed by flavor and
//! database name; the types here are their typed views.

use crate::{DbVaultError, Result};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    Oracle,
    Mysql,
    Mssql,
    Teradata,
    Snowflake,
    Postgres,
    Sqlite,
}

impl Flavor {
    /// Every flavor, in prompt order.
    pub const ALL: [Self; 7] = [
        Self::Oracle,
        Self::Mysql,
        Self::Mssql,
        Self::Teradata,
        Self::Snowflake,
        Self::Postgres,
        Self::Sqlite,
    ];

    /// Key used for this flavor in the vault documents.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Oracle => "oracle",
            Self::Mysql => "mysql",
            Self::Mssql => "mssql",
            Self::Teradata => "teradata",
            Self::Snowflake => "snowflake",
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Fields gathered interactively when registering a database, as
    /// `(field, label)` pairs. Empty answers are dropped.
    pub const fn prompt_fields(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Snowflake => &[
                ("account", "Account"),
                ("database", "Database"),
                ("schema", "Schema"),
                ("warehouse", "Warehouse"),
                ("role", "Role - Enter if none"),
            ],
            Self::Oracle => &[
                ("host", "Host/Database Address"),
                ("schema", "Schema - Enter if none"),
                ("sid", "SID - Enter if none"),
                ("service_name", "Service Name - Enter if none"),
                ("port", "Port Number - Enter if none"),
            ],
            Self::Sqlite => &[("host", "Database file path")],
            Self::Postgres => &[
                ("host", "Host/Database Address"),
                ("database", "Database - Enter to use the name"),
                ("schema", "Schema - Enter if none"),
                ("port", "Port Number - Enter if none"),
            ],
            Self::Mysql | Self::Mssql | Self::Teradata => &[
                ("host", "Host/Database Address"),
                ("schema", "Schema - Enter if none"),
                ("port", "Port Number - Enter if none"),
            ],
        }
    }

    /// Port used when the host record does not carry one.
    pub const fn default_port(self) -> Option<u16> {
        match self {
            Self::Oracle => Some(1521),
            Self::Mysql => Some(3306),
            Self::Mssql => Some(1433),
            Self::Postgres => Some(5432),
            Self::Teradata | Self::Snowflake | Self::Sqlite => None,
        }
    }

    /// File-based backends connect without a username and password.
    pub const fn requires_credentials(self) -> bool {
        !matches!(self, Self::Sqlite)
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flavor {
    type Err = DbVaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oracle" => Ok(Self::Oracle),
            "mysql" => Ok(Self::Mysql),
            "mssql" | "sqlserver" => Ok(Self::Mssql),
            "teradata" => Ok(Self::Teradata),
            "snowflake" => Ok(Self::Snowflake),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite),
            _ => Err(DbVaultError::NotImplementedFlavor {
                flavor: s.to_string(),
            }),
        }
    }
}

/// Connection parameters for one registered database.
///
/// Optional fields that are absent are omitted from the host document,
/// never written as `null` or `""`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Flavor-specific fields without a dedicated slot
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl HostRecord {
    /// Creates an empty record for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            ..Self::default()
        }
    }

    /// Builder-style [`HostRecord::set_field`].
    ///
    /// # Errors
    /// Returns a configuration error for an unparsable port.
    pub fn with_field(mut self, field: &str, value: impl Into<String>) -> Result<Self> {
        self.set_field(field, value)?;
        Ok(self)
    }

    /// Sets a field by its document key. Blank values clear the field.
    ///
    /// # Errors
    /// Returns a configuration error for an unparsable port.
    pub fn set_field(&mut self, field: &str, value: impl Into<String>) -> Result<()> {
        let value = value.into().trim().to_string();
        let text = (!value.is_empty()).then(|| value.clone());

        match field {
            "name" => self.name = value,
            "host" => self.host = text,
            "schema" => self.schema = text,
            "sid" => self.sid = text,
            "service_name" => self.service_name = text,
            "account" => self.account = text,
            "database" => self.database = text,
            "warehouse" => self.warehouse = text,
            "role" => self.role = text,
            "port" => {
                self.port = match text {
                    None => None,
                    Some(port) => Some(port.parse::<u16>().map_err(|_| {
                        DbVaultError::configuration(format!("Invalid port number: {}", port))
                    })?),
                }
            }
            other => {
                match text {
                    Some(text) => self.extra.insert(other.to_string(), text.into()),
                    None => self.extra.remove(other),
                };
            }
        }
        Ok(())
    }

    /// Reads a string-valued field by its document key.
    pub fn field(&self, field: &str) -> Option<String> {
        match field {
            "name" => Some(self.name.clone()).filter(|n| !n.is_empty()),
            "host" => self.host.clone(),
            "schema" => self.schema.clone(),
            "sid" => self.sid.clone(),
            "service_name" => self.service_name.clone(),
            "account" => self.account.clone(),
            "database" => self.database.clone(),
            "warehouse" => self.warehouse.clone(),
            "role" => self.role.clone(),
            "port" => self.port.map(|p| p.to_string()),
            other => self.extra.get(other).map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                v => v.to_string(),
            }),
        }
    }

    /// Checks the fields this flavor needs to build a connection.
    ///
    /// # Errors
    /// Returns a configuration error naming every missing field.
    pub fn validate(&self, flavor: Flavor) -> Result<()> {
        if self.name.is_empty() {
            return Err(DbVaultError::configuration("Database name cannot be empty"));
        }

        let required: &[&str] = match flavor {
            Flavor::Snowflake => &["account", "database", "schema", "warehouse"],
            _ => &["host"],
        };

        let mut missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|field| self.field(field).is_none())
            .collect();

        if flavor == Flavor::Oracle && self.sid.is_none() && self.service_name.is_none() {
            missing.push("sid or service_name");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(DbVaultError::configuration(format!(
                "{} database '{}' is missing required field(s): {}",
                flavor,
                self.name,
                missing.join(", ")
            )))
        }
    }

    /// Database name used in connection URLs.
    pub fn database_name(&self) -> &str {
        self.database.as_deref().unwrap_or(&self.name)
    }
}

/// Host document: flavor → database name → record.
pub type HostMap = BTreeMap<String, BTreeMap<String, HostRecord>>;

/// Encrypted username/password pair as stored in the credential document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialEntry {
    pub username: String,
    pub password: String,
}

/// Credential document: flavor → database name → encrypted entry.
pub type CredentialDocument = BTreeMap<String, BTreeMap<String, CredentialEntry>>;

/// Databases to export for one flavor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseSelection {
    All,
    Names(BTreeSet<String>),
}

impl DatabaseSelection {
    /// Whether `name` is part of the selection.
    pub fn includes(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Names(names) => names.contains(name),
        }
    }
}

/// Flavors and databases to copy into a subset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubsetSelection {
    pub flavors: BTreeMap<Flavor, DatabaseSelection>,
}

impl SubsetSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects every database of `flavor`.
    pub fn all(mut self, flavor: Flavor) -> Self {
        self.flavors.insert(flavor, DatabaseSelection::All);
        self
    }

    /// Selects only the named databases of `flavor`.
    pub fn only<I, S>(mut self, flavor: Flavor, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flavors.insert(
            flavor,
            DatabaseSelection::Names(names.into_iter().map(Into::into).collect()),
        );
        self
    }

    /// Adds an entry written as `flavor` or `flavor:name1,name2`.
    ///
    /// # Errors
    /// Returns `NotImplementedFlavor` for an unknown flavor.
    pub fn add_spec(self, spec: &str) -> Result<Self> {
        match spec.split_once(':') {
            None => Ok(self.all(spec.parse()?)),
            Some((flavor, names)) => {
                let names: Vec<&str> = names
                    .split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .collect();
                let flavor = flavor.parse()?;
                if names.is_empty() {
                    Ok(self.all(flavor))
                } else {
                    Ok(self.only(flavor, names))
                }
            }
        }
    }
}

/// Kind of value a column yields, inferred from its declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Integer,
    Float,
    Decimal,
    Text,
    Boolean,
    Binary,
    Temporal,
    Json,
    Unknown,
}

impl ValueKind {
    /// Maps a declared column type to a value kind.
    ///
    /// Follows SQLite's affinity rules first (INT, CHAR/CLOB/TEXT, BLOB,
    /// REAL/FLOA/DOUB), then recognizes the common server-side names.
    pub fn from_declared_type(declared: &str) -> Self {
        let upper = declared.trim().to_ascii_uppercase();
        let base = upper.split('(').next().unwrap_or("").trim();

        if base.is_empty() {
            return Self::Unknown;
        }
        if base.starts_with("BOOL") || base == "BIT" {
            return Self::Boolean;
        }
        if base.starts_with("INTERVAL") {
            return Self::Temporal;
        }
        if base.contains("INT") || base == "SERIAL" || base == "BIGSERIAL" {
            return Self::Integer;
        }
        if base.contains("CHAR") || base.contains("CLOB") || base.contains("TEXT") {
            return Self::Text;
        }
        if base.contains("BLOB") || base == "BYTEA" || base.contains("BINARY") {
            return Self::Binary;
        }
        if base.contains("REAL") || base.contains("FLOA") || base.contains("DOUB") {
            return Self::Float;
        }
        if base.contains("JSON") {
            return Self::Json;
        }
        if base.contains("DATE") || base.contains("TIME") {
            return Self::Temporal;
        }
        if base.starts_with("NUMERIC") || base.starts_with("DECIMAL") || base == "NUMBER" {
            return Self::Decimal;
        }
        if base == "UUID" || base.contains("STRING") {
            return Self::Text;
        }
        Self::Unknown
    }
}

/// One column of a live table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub declared_type: String,
    pub value_kind: ValueKind,
    pub primary_key: bool,
    pub nullable: bool,
}

/// Best-effort row count; `N/A` when counting failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCount {
    Known(u64),
    Unavailable,
}

impl fmt::Display for RowCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(n) => write!(f, "{}", n),
            Self::Unavailable => f.write_str("N/A"),
        }
    }
}

impl Serialize for RowCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Known(n) => serializer.serialize_u64(*n),
            Self::Unavailable => serializer.serialize_str("N/A"),
        }
    }
}

/// Structure of a live table, resolved on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDescriptor {
    pub table_name: String,
    pub schema: Option<String>,
    pub columns: Vec<ColumnDescriptor>,
    pub row_count: RowCount,
}

impl TableDescriptor {
    /// Column names in declaration order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}
