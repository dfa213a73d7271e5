//! Subset export: a filtered copy of the vault under its own fresh key.

use super::ConfigStore;
use crate::config::VaultPaths;
use crate::models::{CredentialDocument, CredentialEntry, Flavor, HostMap, SubsetSelection};
use crate::security::{CredentialCipher, VaultKey};
use crate::storage::write_json;
use crate::{DbVaultError, Result};
use std::path::PathBuf;

impl ConfigStore {
    /// Exports the selected flavors and databases into `subsets/<name>/`.
    ///
    /// Every selected credential is decrypted under the vault key and
    /// re-encrypted under a newly generated key that differs from the vault
    /// key and from the key of every existing subset. Unnamed subsets are
    /// numbered after the existing subset count.
    ///
    /// # Errors
    /// Returns `InvalidSubset` when no selected flavor has databases in the
    /// vault, a configuration error when the named subset already exists, and
    /// propagates read, decrypt, and write failures.
    pub fn create_subset(&self, selection: &SubsetSelection, name: Option<&str>) -> Result<PathBuf> {
        let hosts = self.load_hosts()?;
        let credentials = self.load_credentials()?;

        let flavors: Vec<Flavor> = selection
            .flavors
            .keys()
            .copied()
            .filter(|flavor| {
                hosts
                    .get(flavor.as_str())
                    .is_some_and(|entries| !entries.is_empty())
            })
            .collect();

        if flavors.is_empty() {
            return Err(DbVaultError::InvalidSubset {
                requested: selection
                    .flavors
                    .keys()
                    .map(|f| f.as_str().to_string())
                    .collect(),
            });
        }

        let source = CredentialCipher::new(&VaultKey::load(&self.paths.key)?);
        let key = self.fresh_subset_key()?;
        let target = CredentialCipher::new(&key);

        let mut subset_hosts = HostMap::new();
        let mut subset_credentials = CredentialDocument::new();

        for flavor in flavors {
            let wanted = &selection.flavors[&flavor];
            let Some(entries) = hosts.get(flavor.as_str()) else {
                continue;
            };

            let selected: Vec<_> = entries
                .iter()
                .filter(|(name, _)| wanted.includes(name))
                .collect();
            if selected.is_empty() {
                tracing::warn!("No selected {} databases exist in the vault", flavor);
                continue;
            }

            for (name, record) in selected {
                subset_hosts
                    .entry(flavor.as_str().to_string())
                    .or_default()
                    .insert(name.clone(), record.clone());

                let Some(entry) = credentials.get(flavor.as_str()).and_then(|c| c.get(name))
                else {
                    continue;
                };

                let reencrypted = CredentialEntry {
                    username: reencrypt(&source, &target, &entry.username)?,
                    password: reencrypt(&source, &target, &entry.password)?,
                };
                subset_credentials
                    .entry(flavor.as_str().to_string())
                    .or_default()
                    .insert(name.clone(), reencrypted);
            }
        }

        let subset_name = match name {
            Some(name) => validate_subset_name(name)?,
            None => self.next_subset_name()?,
        };
        let dir = self.paths.subsets.join(&subset_name);
        if dir.exists() {
            return Err(DbVaultError::configuration(format!(
                "Subset '{}' already exists",
                subset_name
            )));
        }

        std::fs::create_dir_all(&dir)
            .map_err(|e| DbVaultError::io(format!("creating {}", dir.display()), e))?;
        let paths = VaultPaths::in_dir(&dir);
        write_json(&paths.hosts, &subset_hosts)?;
        write_json(&paths.credentials, &subset_credentials)?;
        key.save(&paths.key)?;

        let count: usize = subset_hosts.values().map(|entries| entries.len()).sum();
        tracing::info!(
            "Created subset '{}' with {} databases at {}",
            subset_name,
            count,
            dir.display()
        );
        Ok(dir)
    }

    /// Opens an exported subset as a vault of its own.
    ///
    /// # Errors
    /// Returns a configuration error if the subset does not exist.
    pub fn for_subset(&self, name: &str) -> Result<Self> {
        let dir = self.paths.subsets.join(validate_subset_name(name)?);
        if !dir.is_dir() {
            return Err(DbVaultError::configuration(format!(
                "Subset '{}' does not exist",
                name
            )));
        }
        Ok(Self::from_paths(VaultPaths::in_dir(&dir)))
    }

    /// Names of the existing subsets, sorted.
    ///
    /// # Errors
    /// Propagates failures listing the subset directory.
    pub fn list_subsets(&self) -> Result<Vec<String>> {
        if !self.paths.subsets.exists() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.paths.subsets).map_err(|e| {
            DbVaultError::io(format!("listing {}", self.paths.subsets.display()), e)
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DbVaultError::io("listing subsets", e))?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn next_subset_name(&self) -> Result<String> {
        let mut number = self.list_subsets()?.len().saturating_add(1);
        while self.paths.subsets.join(number.to_string()).exists() {
            number = number.saturating_add(1);
        }
        Ok(number.to_string())
    }

    /// Generates a key unequal to the vault key and every subset key.
    fn fresh_subset_key(&self) -> Result<VaultKey> {
        let mut taken = vec![VaultKey::load(&self.paths.key)?];
        for subset in self.list_subsets()? {
            let path = VaultPaths::in_dir(&self.paths.subsets.join(subset)).key;
            if let Ok(key) = VaultKey::load(&path) {
                taken.push(key);
            }
        }

        loop {
            let key = VaultKey::generate();
            if !taken.contains(&key) {
                return Ok(key);
            }
        }
    }
}

fn reencrypt(source: &CredentialCipher, target: &CredentialCipher, token: &str) -> Result<String> {
    let plaintext = zeroize::Zeroizing::new(source.decrypt(token.as_bytes())?);
    let token = target.encrypt(&plaintext)?;
    String::from_utf8(token).map_err(|_| DbVaultError::InvalidToken)
}

fn validate_subset_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(DbVaultError::configuration(format!(
            "Invalid subset name: '{}'",
            name
        )));
    }
    Ok(name.to_string())
}
