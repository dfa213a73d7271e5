//! Registering and removing databases.

use super::{ConfigStore, Prompt};
use crate::models::{CredentialDocument, Flavor, HostRecord};
use crate::storage::write_json;
use crate::{DbVaultError, Result};

impl ConfigStore {
    /// Registers `record` under `flavor`.
    ///
    /// On a name collision the prompt must confirm the replacement; a refusal
    /// leaves the vault untouched and returns `Ok(false)`.
    ///
    /// # Errors
    /// Returns a configuration error if the record lacks a field the flavor
    /// requires, and propagates host document read and write failures.
    pub fn add_host(
        &self,
        flavor: Flavor,
        record: HostRecord,
        prompt: &mut dyn Prompt,
    ) -> Result<bool> {
        record.validate(flavor)?;

        if self.host_exists(flavor, &record.name)? && !confirm_replace(prompt, flavor, &record.name)? {
            tracing::info!("Keeping existing {} database '{}'", flavor, record.name);
            return Ok(false);
        }

        self.insert_host(flavor, record)?;
        Ok(true)
    }

    /// Gathers a flavor, a name, and the flavor's fields from the prompt,
    /// then registers the database.
    ///
    /// Returns the registered `(flavor, name)`, or `None` when the user
    /// declined to replace an existing database.
    ///
    /// # Errors
    /// Same as [`ConfigStore::add_host`], plus prompt failures.
    pub fn add_host_interactive(&self, prompt: &mut dyn Prompt) -> Result<Option<(Flavor, String)>> {
        let flavor = prompt.choose_flavor()?;
        let name = prompt
            .text(
                "Name for database - for some flavors like mysql database name is used to create engine",
                None,
            )?
            .trim()
            .to_string();

        if self.host_exists(flavor, &name)? && !confirm_replace(prompt, flavor, &name)? {
            return Ok(None);
        }

        let mut record = HostRecord::new(name.clone());
        for (field, label) in flavor.prompt_fields() {
            let answer = prompt.text(label, Some(""))?;
            record.set_field(field, answer)?;
        }

        self.insert_host(flavor, record)?;
        Ok(Some((flavor, name)))
    }

    /// Unregisters a database and drops its stored credentials.
    ///
    /// A missing credential entry is not an error.
    ///
    /// # Errors
    /// Returns `MissingFlavor` if the flavor has no databases and
    /// `MissingDatabase` if `name` is not registered. Read, parse, and write
    /// failures propagate.
    pub fn remove_host(&self, flavor: Flavor, name: &str) -> Result<()> {
        let mut hosts = self.load_hosts()?;

        let entries = hosts
            .get_mut(flavor.as_str())
            .filter(|entries| !entries.is_empty())
            .ok_or_else(|| DbVaultError::missing_flavor(flavor.as_str()))?;

        if entries.remove(name).is_none() {
            return Err(DbVaultError::missing_database(flavor.as_str(), name));
        }
        if entries.is_empty() {
            hosts.remove(flavor.as_str());
        }

        // Read before anything is written so a malformed credential
        // document leaves the vault unchanged.
        let credentials = self.load_existing_credentials()?;

        write_json(&self.paths.hosts, &hosts)?;
        tracing::info!("Removed {} database '{}'", flavor, name);

        if let Some(mut document) = credentials
            && drop_credential_entry(&mut document, flavor, name)
        {
            write_json(&self.paths.credentials, &document)?;
            tracing::debug!("Removed stored credentials for '{}'", name);
        }
        Ok(())
    }

    /// Asks for a flavor and a name, then removes that database.
    ///
    /// # Errors
    /// Same as [`ConfigStore::remove_host`], plus prompt failures.
    pub fn remove_host_interactive(&self, prompt: &mut dyn Prompt) -> Result<(Flavor, String)> {
        let flavor = prompt.choose_flavor()?;
        self.ensure_flavor(flavor)?;
        let name = prompt.text("Name of the database to remove", None)?;
        self.remove_host(flavor, name.trim())?;
        Ok((flavor, name.trim().to_string()))
    }

    fn insert_host(&self, flavor: Flavor, record: HostRecord) -> Result<()> {
        record.validate(flavor)?;

        let mut hosts = self.load_hosts()?;
        tracing::info!("Registering {} database '{}'", flavor, record.name);
        hosts
            .entry(flavor.as_str().to_string())
            .or_default()
            .insert(record.name.clone(), record);
        write_json(&self.paths.hosts, &hosts)
    }

    fn host_exists(&self, flavor: Flavor, name: &str) -> Result<bool> {
        Ok(self
            .load_hosts()?
            .get(flavor.as_str())
            .is_some_and(|entries| entries.contains_key(name)))
    }

    /// Fails early with `MissingFlavor` before prompting for a name.
    pub(crate) fn ensure_flavor(&self, flavor: Flavor) -> Result<()> {
        let has_entries = self
            .load_hosts()?
            .get(flavor.as_str())
            .is_some_and(|entries| !entries.is_empty());
        if has_entries {
            Ok(())
        } else {
            Err(DbVaultError::missing_flavor(flavor.as_str()))
        }
    }
}

fn confirm_replace(prompt: &mut dyn Prompt, flavor: Flavor, name: &str) -> Result<bool> {
    prompt.confirm(&format!(
        "There exists a {} database in your {}. Do you wish to replace it?",
        name, flavor
    ))
}

/// Removes `(flavor, name)` from `document`, pruning an emptied flavor.
/// Returns `false` when there was no entry.
fn drop_credential_entry(document: &mut CredentialDocument, flavor: Flavor, name: &str) -> bool {
    let Some(entries) = document.get_mut(flavor.as_str()) else {
        return false;
    };
    if entries.remove(name).is_none() {
        return false;
    }
    if entries.is_empty() {
        document.remove(flavor.as_str());
    }
    true
}
