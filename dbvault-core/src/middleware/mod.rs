//! Dynamic table access over an open database connection.
//!
//! [`ConnectionMiddleware`] discovers the tables and views of a schema when
//! it opens and exposes, for each one, a read accessor plus metadata, insert,
//! and update namespaces. Reads go through a bounded LRU cache shared by all
//! accessors of the connection.
//!
//! # Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "sqlite")]
//! # async fn example() -> dbvault_core::Result<()> {
//! use dbvault_core::middleware::{AccessRequest, ConnectionMiddleware, SqliteBackend};
//!
//! let backend = SqliteBackend::connect("app.db").await?;
//! let db = ConnectionMiddleware::open(Box::new(backend), false, None).await?;
//!
//! let frame = db
//!     .table("currency")?
//!     .call(&AccessRequest::new().columns(["code"]).filter("active", true))
//!     .await?;
//! println!("{} rows", frame.shape().0);
//! db.close().await;
//! # Ok(())
//! # }
//! ```

mod accessor;
mod backend;
mod bulk;
mod cache;
mod filter;
mod frame;
mod metadata;
mod query;

#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "postgresql")]
mod postgres;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use accessor::{AccessRequest, InsertAccessor, TableAccessor, UpdateAccessor};
pub use backend::Backend;
pub use bulk::{CHUNK_SIZE, RETRY_DELAY, UpdateColumns, WritePolicy, bulk_insert, bulk_update};
pub use cache::CACHE_SIZE;
pub use filter::{FilterValue, Filters};
pub use frame::Frame;
pub use metadata::TableMetadata;
pub use query::{Dialect, Statement};

#[cfg(feature = "mysql")]
pub use mysql::MySqlBackend;
#[cfg(feature = "postgresql")]
pub use postgres::PostgresBackend;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

use crate::{DbVaultError, Result};
use cache::ResultCache;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// State shared by a connection and every accessor it handed out.
///
/// Disposal empties the backend slot, after which all accessors fail with
/// `Disposed`.
pub(crate) struct ConnectionState {
    backend: Mutex<Option<Arc<dyn Backend>>>,
    cache: ResultCache,
    policy: WritePolicy,
}

impl ConnectionState {
    fn new(backend: Arc<dyn Backend>, policy: WritePolicy) -> Self {
        Self {
            backend: Mutex::new(Some(backend)),
            cache: ResultCache::default(),
            policy,
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<dyn Backend>>> {
        self.backend
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn backend(&self) -> Result<Arc<dyn Backend>> {
        self.slot().clone().ok_or(DbVaultError::Disposed)
    }

    fn dispose(&self) -> Option<Arc<dyn Backend>> {
        let backend = self.slot().take();
        self.cache.clear();
        backend
    }
}

/// Accessors for one table or view.
#[derive(Clone)]
struct TableEntry {
    read: TableAccessor,
    metadata: TableMetadata,
    insert: InsertAccessor,
    update: UpdateAccessor,
}

/// An open connection with per-table accessors.
pub struct ConnectionMiddleware {
    state: Arc<ConnectionState>,
    schema: Option<String>,
    connect_only: bool,
    tables: BTreeMap<String, TableEntry>,
}

impl ConnectionMiddleware {
    /// Wraps `backend` and discovers its tables and views.
    ///
    /// With `connect_only` no discovery happens and no accessors exist; the
    /// raw backend stays available through [`ConnectionMiddleware::connection`].
    /// Without an explicit `schema` the backend's default schema is used.
    ///
    /// # Errors
    /// Propagates backend errors from schema and table discovery.
    pub async fn open(
        backend: Box<dyn Backend>,
        connect_only: bool,
        schema: Option<&str>,
    ) -> Result<Self> {
        Self::open_with_policy(backend, connect_only, schema, WritePolicy::default()).await
    }

    /// Like [`ConnectionMiddleware::open`] with a custom bulk write policy.
    ///
    /// # Errors
    /// Propagates backend errors from schema and table discovery.
    pub async fn open_with_policy(
        backend: Box<dyn Backend>,
        connect_only: bool,
        schema: Option<&str>,
        policy: WritePolicy,
    ) -> Result<Self> {
        let backend: Arc<dyn Backend> = Arc::from(backend);

        if connect_only {
            tracing::debug!("Opened connection without table discovery");
            return Ok(Self {
                state: Arc::new(ConnectionState::new(backend, policy)),
                schema: schema.map(str::to_string),
                connect_only,
                tables: BTreeMap::new(),
            });
        }

        let schema = match schema {
            Some(schema) => Some(schema.to_string()),
            None => backend.default_schema().await?,
        };
        let tables = backend.list_tables(schema.as_deref()).await?;
        let views = backend.list_views(schema.as_deref()).await?;
        tracing::info!(
            "Discovered {} tables and {} views in schema {}",
            tables.len(),
            views.len(),
            schema.as_deref().unwrap_or("(default)")
        );

        let state = Arc::new(ConnectionState::new(backend, policy));
        let entries = tables
            .into_iter()
            .chain(views)
            .map(|name| {
                let entry = TableEntry {
                    read: TableAccessor::new(name.clone(), schema.clone(), Arc::clone(&state)),
                    metadata: TableMetadata::new(name.clone(), schema.clone(), Arc::clone(&state)),
                    insert: InsertAccessor::new(name.clone(), schema.clone(), Arc::clone(&state)),
                    update: UpdateAccessor::new(name.clone(), schema.clone(), Arc::clone(&state)),
                };
                (name, entry)
            })
            .collect();

        Ok(Self {
            state,
            schema,
            connect_only,
            tables: entries,
        })
    }

    /// Names of the discovered tables and views, sorted.
    pub fn tables(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn is_connect_only(&self) -> bool {
        self.connect_only
    }

    fn entry(&self, name: &str) -> Result<&TableEntry> {
        self.tables.get(name).ok_or_else(|| DbVaultError::NoSuchTable {
            table: name.to_string(),
        })
    }

    /// Read accessor for `name`.
    ///
    /// # Errors
    /// Returns `NoSuchTable` if `name` was not discovered.
    pub fn table(&self, name: &str) -> Result<&TableAccessor> {
        Ok(&self.entry(name)?.read)
    }

    /// # Errors
    /// Returns `NoSuchTable` if `name` was not discovered.
    pub fn metadata(&self, name: &str) -> Result<&TableMetadata> {
        Ok(&self.entry(name)?.metadata)
    }

    /// # Errors
    /// Returns `NoSuchTable` if `name` was not discovered.
    pub fn insert(&self, name: &str) -> Result<&InsertAccessor> {
        Ok(&self.entry(name)?.insert)
    }

    /// # Errors
    /// Returns `NoSuchTable` if `name` was not discovered.
    pub fn update(&self, name: &str) -> Result<&UpdateAccessor> {
        Ok(&self.entry(name)?.update)
    }

    /// The underlying backend.
    ///
    /// # Errors
    /// Returns `Disposed` after [`ConnectionMiddleware::close`].
    pub fn connection(&self) -> Result<Arc<dyn Backend>> {
        self.state.backend()
    }

    /// Closes the pool and invalidates every accessor. Closing twice is a
    /// no-op.
    pub async fn close(&self) {
        if let Some(backend) = self.state.dispose() {
            backend.close().await;
            tracing::debug!("Connection closed");
        }
    }
}

impl Drop for ConnectionMiddleware {
    fn drop(&mut self) {
        // The pool is released once in-flight calls drop their handles.
        self.state.dispose();
    }
}

impl std::fmt::Debug for ConnectionMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMiddleware")
            .field("schema", &self.schema)
            .field("connect_only", &self.connect_only)
            .field("tables", &self.tables.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
