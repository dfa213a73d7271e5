//! Core library for dbvault.
//!
//! dbvault keeps connection parameters and encrypted credentials for many
//! databases in a local vault, and opens them on demand behind a dynamic
//! table-access layer.
//!
//! # Security Guarantees
//! - Usernames and passwords are stored only as AES-GCM ciphertext
//! - The vault key lives in its own owner-only file, never beside the data
//! - Connection URLs are redacted before they reach the logs
//! - Subset exports are re-encrypted under a fresh key
//!
//! # Architecture
//! - [`vault::ConfigStore`] owns the host document, the credential document,
//!   and the key file
//! - [`connectors`] turns a host record into a live [`middleware::Backend`]
//! - [`middleware::ConnectionMiddleware`] discovers tables and serves cached
//!   reads and chunked bulk writes
//! - [`registry::DatabaseRegistry`] ties them together per flavor

pub mod config;
pub mod connectors;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod models;
pub mod registry;
pub mod security;
pub mod vault;

mod storage;

// Re-export commonly used types
pub use config::VaultConfig;
pub use connectors::{Connector, ConnectorSet};
pub use error::{DbVaultError, Result};
pub use logging::init_logging;
pub use middleware::{
    AccessRequest, Backend, ConnectionMiddleware, FilterValue, Frame, UpdateColumns, WritePolicy,
};
pub use models::{
    ColumnDescriptor, DatabaseSelection, Flavor, HostRecord, RowCount, SubsetSelection,
    TableDescriptor, ValueKind,
};
pub use registry::{ConnectOptions, DatabaseRegistry};
pub use security::Credentials;
pub use vault::{ConfigStore, Prompt, TerminalPrompt};
