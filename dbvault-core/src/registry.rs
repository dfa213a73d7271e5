//! Per-flavor registry of lazily opened database connections.

use crate::connectors::ConnectorSet;
use crate::middleware::ConnectionMiddleware;
use crate::models::{Flavor, HostRecord};
use crate::security::Credentials;
use crate::vault::{ConfigStore, Prompt};
use crate::{DbVaultError, Result};
use std::collections::BTreeMap;

/// Options for opening a registered database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Skip table discovery and expose only the raw connection.
    pub connect_only: bool,
    /// Schema to discover; defaults to the host record's schema, then the
    /// backend's default.
    pub schema: Option<String>,
}

/// The databases of one flavor, connected on first access.
///
/// Stored credentials are used when present; otherwise the prompt is asked
/// and the answers are saved only after the connection succeeds.
pub struct DatabaseRegistry {
    flavor: Flavor,
    store: ConfigStore,
    hosts: BTreeMap<String, HostRecord>,
    connectors: ConnectorSet,
    prompt: Box<dyn Prompt>,
    connections: BTreeMap<String, ConnectionMiddleware>,
}

impl DatabaseRegistry {
    /// Loads the registered databases of `flavor`.
    ///
    /// # Errors
    /// Returns `NotImplementedFlavor` for an unknown flavor, `EmptyHostFile`
    /// when the vault has no databases at all, and `MissingFlavor` when none
    /// are registered for `flavor`.
    pub fn open(
        flavor: &str,
        store: ConfigStore,
        connectors: ConnectorSet,
        prompt: Box<dyn Prompt>,
    ) -> Result<Self> {
        let flavor: Flavor = flavor.parse()?;

        let mut hosts = store.get_hosts();
        if hosts.values().all(BTreeMap::is_empty) {
            return Err(DbVaultError::EmptyHostFile);
        }
        let entries = hosts
            .remove(flavor.as_str())
            .filter(|entries| !entries.is_empty())
            .ok_or_else(|| DbVaultError::missing_flavor(flavor.as_str()))?;

        tracing::debug!("Loaded {} {} databases", entries.len(), flavor);
        Ok(Self {
            flavor,
            store,
            hosts: entries,
            connectors,
            prompt,
            connections: BTreeMap::new(),
        })
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    /// Registered database names, sorted.
    pub fn databases(&self) -> Vec<&str> {
        self.hosts.keys().map(String::as_str).collect()
    }

    /// Configured schema of each database.
    pub fn schemas(&self) -> BTreeMap<&str, Option<&str>> {
        self.hosts
            .iter()
            .map(|(name, record)| (name.as_str(), record.schema.as_deref()))
            .collect()
    }

    /// # Errors
    /// Returns `MissingDatabase` if `name` is not registered.
    pub fn host(&self, name: &str) -> Result<&HostRecord> {
        self.hosts
            .get(name)
            .ok_or_else(|| DbVaultError::missing_database(self.flavor.as_str(), name))
    }

    /// Whether `name` has an open connection.
    pub fn is_connected(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }

    /// Returns the open connection to `name`, whatever options it was
    /// opened with, or opens it with default options.
    ///
    /// # Errors
    /// Same as [`DatabaseRegistry::connect`].
    pub async fn database(&mut self, name: &str) -> Result<&ConnectionMiddleware> {
        if self.connections.contains_key(name) {
            return self.cached(name);
        }
        self.connect(name, ConnectOptions::default()).await
    }

    /// Opens `name`, reusing an earlier connection.
    ///
    /// An open connection is reused only when it matches `options`: the
    /// same `connect_only` mode and, when `options.schema` is set, the same
    /// schema. Reopening with other options requires
    /// [`DatabaseRegistry::close`] first.
    ///
    /// # Errors
    /// Returns `MissingDatabase` for unregistered names, a configuration
    /// error when an open connection does not match `options`,
    /// `InvalidToken` when stored credentials do not decrypt,
    /// `MissingPackage` when the driver is unavailable, and the driver's own
    /// error when connecting fails.
    pub async fn connect(
        &mut self,
        name: &str,
        options: ConnectOptions,
    ) -> Result<&ConnectionMiddleware> {
        if let Some(open) = self.connections.get(name) {
            let schema_differs = options
                .schema
                .as_deref()
                .is_some_and(|schema| open.schema() != Some(schema));
            if open.is_connect_only() != options.connect_only || schema_differs {
                return Err(DbVaultError::configuration(format!(
                    "{} database '{}' is already open with different options",
                    self.flavor, name
                )));
            }
            return self.cached(name);
        }

        let host = self.host(name)?.clone();
        let connector = self.connectors.get(self.flavor);

        let (credentials, entered) = if connector.requires_credentials() {
            match self.store.decrypt_credentials(self.flavor, name)? {
                Some(credentials) => (credentials, false),
                None => {
                    tracing::info!("No stored credentials for {} database '{}'", self.flavor, name);
                    (ConfigStore::ask_credentials(self.prompt.as_mut())?, true)
                }
            }
        } else {
            (Credentials::anonymous(), false)
        };

        let backend = connector.connect(&host, &credentials).await?;

        if entered {
            self.store
                .store_credentials(self.flavor, name, &credentials, None)?;
            tracing::info!("Saved credentials for {} database '{}'", self.flavor, name);
        }

        let schema = options.schema.or_else(|| host.schema.clone());
        let middleware =
            ConnectionMiddleware::open(backend, options.connect_only, schema.as_deref()).await?;
        self.connections.insert(name.to_string(), middleware);
        self.cached(name)
    }

    fn cached(&self, name: &str) -> Result<&ConnectionMiddleware> {
        self.connections
            .get(name)
            .ok_or_else(|| DbVaultError::missing_database(self.flavor.as_str(), name))
    }

    /// Closes the connection to `name`, if open.
    pub async fn close(&mut self, name: &str) {
        if let Some(connection) = self.connections.remove(name) {
            tracing::debug!("Closing {} database '{}'", self.flavor, name);
            connection.close().await;
        }
    }

    /// Closes every open connection.
    pub async fn close_all(&mut self) {
        for (name, connection) in std::mem::take(&mut self.connections) {
            tracing::debug!("Closing {} database '{}'", self.flavor, name);
            connection.close().await;
        }
    }
}

impl std::fmt::Debug for DatabaseRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseRegistry")
            .field("flavor", &self.flavor)
            .field("databases", &self.databases())
            .field("connected", &self.connections.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
