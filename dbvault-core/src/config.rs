//! Vault location configuration.
//!
//! The vault directory and the optional key-file override are resolved once
//! (usually from the environment at process start) into a [`VaultConfig`]
//! that is passed explicitly to [`crate::vault::ConfigStore`].

use crate::{DbVaultError, Result};
use std::path::{Path, PathBuf};

/// Overrides the vault directory.
pub const BASE_DIR_ENV: &str = "DBVAULT_HOME";
/// Overrides the key file location.
pub const KEY_PATH_ENV: &str = "DBVAULT_KEY";

const DEFAULT_DIR_NAME: &str = ".dbvault";
const HOST_FILE: &str = "host.json";
const CREDENTIAL_FILE: &str = "config.json";
const KEY_FILE: &str = "configkey";
const SUBSET_DIR: &str = "subsets";

/// Where the vault lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfig {
    /// Directory holding the host and credential documents
    pub base_dir: PathBuf,
    /// Separate key file; defaults to `configkey` inside `base_dir`
    pub key_path: Option<PathBuf>,
}

impl VaultConfig {
    /// Creates a configuration rooted at `base_dir` with the default key location.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            key_path: None,
        }
    }

    /// Stores the key outside the vault directory.
    pub fn with_key_path(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    /// Reads `DBVAULT_HOME` and `DBVAULT_KEY`.
    ///
    /// Without `DBVAULT_HOME` the vault lives in `~/.dbvault`. Empty values
    /// are treated as unset.
    ///
    /// # Errors
    /// Returns a configuration error when no home directory can be determined
    /// and `DBVAULT_HOME` is unset.
    pub fn from_env() -> Result<Self> {
        let base_dir = match std::env::var_os(BASE_DIR_ENV).filter(|v| !v.is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .map(|home| home.join(DEFAULT_DIR_NAME))
                .ok_or_else(|| {
                    DbVaultError::configuration(format!(
                        "Could not determine a home directory; set {}",
                        BASE_DIR_ENV
                    ))
                })?,
        };

        let key_path = std::env::var_os(KEY_PATH_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        tracing::debug!("Vault directory: {}", base_dir.display());

        Ok(Self { base_dir, key_path })
    }

    /// Resolves the individual file locations.
    pub fn paths(&self) -> VaultPaths {
        let mut paths = VaultPaths::in_dir(&self.base_dir);
        if let Some(key) = &self.key_path {
            paths.key = key.clone();
        }
        paths
    }
}

/// Resolved file locations of one vault (or one subset).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultPaths {
    pub base_dir: PathBuf,
    pub hosts: PathBuf,
    pub credentials: PathBuf,
    pub key: PathBuf,
    pub subsets: PathBuf,
}

impl VaultPaths {
    /// Standard layout with every file inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            base_dir: dir.to_path_buf(),
            hosts: dir.join(HOST_FILE),
            credentials: dir.join(CREDENTIAL_FILE),
            key: dir.join(KEY_FILE),
            subsets: dir.join(SUBSET_DIR),
        }
    }
}
