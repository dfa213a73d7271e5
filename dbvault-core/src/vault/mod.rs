//! The encrypted credential vault.
//!
//! [`ConfigStore`] exclusively owns three documents inside the vault
//! directory:
//! - `host.json`: `{flavor: {name: HostRecord}}`
//! - `config.json`: `{flavor: {name: {username, password}}}` holding
//!   base64 AES-GCM tokens, never plaintext
//! - `configkey`: the raw 32-byte vault key
//!
//! Documents are rewritten whole on every mutation. There is no
//! inter-process lock: two processes mutating the same vault can lose an
//! update (last writer wins).
//!
//! Read-only discovery ([`ConfigStore::get_hosts`],
//! [`ConfigStore::read_credentials`]) treats unreadable documents as empty.
//! Every mutation propagates read and parse failures instead.

mod credentials;
mod hosts;
mod prompt;
mod subset;


pub use prompt::{Prompt, TerminalPrompt};

#[cfg(test)]
pub(crate) use prompt::ScriptedPrompt;

use crate::config::{VaultConfig, VaultPaths};
use crate::models::{CredentialDocument, CredentialEntry, Flavor, HostMap};
use crate::security::{CredentialCipher, Credentials, VaultKey};
use crate::storage::{read_json, write_json};
use crate::{DbVaultError, Result};

/// Owner of the on-disk vault documents.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    paths: VaultPaths,
}

impl ConfigStore {
    /// Creates a store for the configured vault location without touching disk.
    pub fn new(config: &VaultConfig) -> Self {
        Self::from_paths(config.paths())
    }

    pub fn from_paths(paths: VaultPaths) -> Self {
        Self { paths }
    }

    /// Creates a store and initializes any missing vault files.
    ///
    /// # Errors
    /// Returns an I/O error if the vault directory or files cannot be created.
    pub fn open(config: &VaultConfig) -> Result<Self> {
        let store = Self::new(config);
        store.initialize()?;
        Ok(store)
    }

    pub fn paths(&self) -> &VaultPaths {
        &self.paths
    }

    /// Creates the vault directory, empty documents, and a key, each only if
    /// absent. Existing files are never overwritten.
    ///
    /// # Errors
    /// Returns an I/O error if any file cannot be created.
    pub fn initialize(&self) -> Result<()> {
        std::fs::create_dir_all(&self.paths.base_dir).map_err(|e| {
            DbVaultError::io(format!("creating {}", self.paths.base_dir.display()), e)
        })?;

        if !self.paths.hosts.exists() {
            tracing::debug!("Creating empty host document");
            write_json(&self.paths.hosts, &HostMap::new())?;
        }
        if !self.paths.credentials.exists() {
            tracing::debug!("Creating empty credential document");
            write_json(&self.paths.credentials, &CredentialDocument::new())?;
        }
        if !self.paths.key.exists() {
            tracing::info!("Generating new vault key at {}", self.paths.key.display());
            VaultKey::generate().save(&self.paths.key)?;
        }
        Ok(())
    }

    /// Reads the host document; any read or parse failure yields an empty map.
    pub fn get_hosts(&self) -> HostMap {
        match read_json::<HostMap>(&self.paths.hosts) {
            Ok(hosts) => with_names(hosts),
            Err(e) => {
                tracing::debug!("Treating host document as empty: {}", e);
                HostMap::new()
            }
        }
    }

    /// Strict read of the host document for mutation paths.
    pub(crate) fn load_hosts(&self) -> Result<HostMap> {
        read_json::<HostMap>(&self.paths.hosts).map(with_names)
    }

    /// Strict read of the credential document for mutation paths.
    pub(crate) fn load_credentials(&self) -> Result<CredentialDocument> {
        read_json(&self.paths.credentials)
    }

    /// Returns the stored `(username, password)` tokens, still encrypted.
    ///
    /// `None` when the document is absent or unreadable, or when the pair is
    /// not registered. Never fails.
    pub fn read_credentials(&self, flavor: Flavor, name: &str) -> Option<(Vec<u8>, Vec<u8>)> {
        let document: CredentialDocument = match read_json(&self.paths.credentials) {
            Ok(document) => document,
            Err(e) => {
                tracing::debug!("No readable credential document: {}", e);
                return None;
            }
        };

        document
            .get(flavor.as_str())
            .and_then(|entries| entries.get(name))
            .map(|entry| {
                (
                    entry.username.clone().into_bytes(),
                    entry.password.clone().into_bytes(),
                )
            })
    }

    /// Stores encrypted tokens for `(flavor, name)`, replacing any prior entry.
    ///
    /// `existing` lets a caller that already holds the document merge into
    /// it; otherwise the current document is loaded first.
    ///
    /// # Errors
    /// Propagates read, parse, and write failures. Tokens that are not UTF-8
    /// fail with `InvalidToken`.
    pub fn write_credentials(
        &self,
        flavor: Flavor,
        name: &str,
        username: &[u8],
        password: &[u8],
        existing: Option<CredentialDocument>,
    ) -> Result<()> {
        let mut document = match existing {
            Some(document) => document,
            None => self.load_credentials()?,
        };

        let entry = CredentialEntry {
            username: token_string(username)?,
            password: token_string(password)?,
        };

        document
            .entry(flavor.as_str().to_string())
            .or_default()
            .insert(name.to_string(), entry);

        write_json(&self.paths.credentials, &document)?;
        tracing::debug!("Stored credentials for {} database '{}'", flavor, name);
        Ok(())
    }

    /// Strict read of the credential document, `None` when it does not exist.
    pub(crate) fn load_existing_credentials(&self) -> Result<Option<CredentialDocument>> {
        if self.paths.credentials.exists() {
            self.load_credentials().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Encrypts or decrypts `data` under the vault key.
    ///
    /// The key is read from disk on every call, so a key replaced out of band
    /// is picked up immediately.
    ///
    /// # Errors
    /// Returns an I/O error if the key cannot be read, or `InvalidToken` when
    /// decrypting a foreign or altered token.
    pub fn encrypt_decrypt(&self, data: &[u8], encrypt: bool) -> Result<Vec<u8>> {
        let key = VaultKey::load(&self.paths.key)?;
        let cipher = CredentialCipher::new(&key);
        if encrypt {
            cipher.encrypt(data)
        } else {
            cipher.decrypt(data)
        }
    }

    /// Decrypts the stored credentials for `(flavor, name)`.
    ///
    /// `Ok(None)` when nothing is stored.
    ///
    /// # Errors
    /// Returns `InvalidToken` when a stored token does not decrypt under the
    /// current key.
    pub fn decrypt_credentials(&self, flavor: Flavor, name: &str) -> Result<Option<Credentials>> {
        let Some((username, password)) = self.read_credentials(flavor, name) else {
            return Ok(None);
        };

        let username = plaintext_string(self.encrypt_decrypt(&username, false)?)?;
        let password = plaintext_string(self.encrypt_decrypt(&password, false)?)?;
        Ok(Some(Credentials::new(username, Some(password))))
    }

    /// Encrypts and stores plaintext credentials.
    ///
    /// # Errors
    /// Propagates key, read, and write failures.
    pub fn store_credentials(
        &self,
        flavor: Flavor,
        name: &str,
        credentials: &Credentials,
        existing: Option<CredentialDocument>,
    ) -> Result<()> {
        let username = self.encrypt_decrypt(credentials.username().as_bytes(), true)?;
        let password =
            self.encrypt_decrypt(credentials.password().unwrap_or("").as_bytes(), true)?;
        self.write_credentials(flavor, name, &username, &password, existing)
    }
}

/// Fills in record names from their map keys for documents written by hand.
fn with_names(mut hosts: HostMap) -> HostMap {
    for entries in hosts.values_mut() {
        for (name, record) in entries.iter_mut() {
            if record.name.is_empty() {
                record.name.clone_from(name);
            }
        }
    }
    hosts
}

fn token_string(token: &[u8]) -> Result<String> {
    String::from_utf8(token.to_vec()).map_err(|_| DbVaultError::InvalidToken)
}

fn plaintext_string(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|_| DbVaultError::InvalidToken)
}
