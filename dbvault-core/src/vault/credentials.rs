//! Credential prompting and reset.

use super::{ConfigStore, Prompt, plaintext_string};
use crate::models::Flavor;
use crate::security::Credentials;
use crate::{DbVaultError, Result};

impl ConfigStore {
    /// Prompts for a username and a masked password.
    ///
    /// # Errors
    /// Propagates prompt failures.
    pub fn ask_credentials(prompt: &mut dyn Prompt) -> Result<Credentials> {
        let username = prompt.text("Username", None)?;
        let password = prompt.password("Password")?;
        Ok(Credentials::new(username, Some(password)))
    }

    /// Replaces the stored credentials of a registered database.
    ///
    /// The password is always asked for again; an existing username is shown
    /// and may be kept. The new credentials are not tested against the
    /// database.
    ///
    /// # Errors
    /// Returns `MissingFlavor` / `MissingDatabase` for an unregistered
    /// database, `InvalidToken` if the stored username does not decrypt, and
    /// propagates read and write failures.
    pub fn reset_credentials(
        &self,
        flavor: Flavor,
        name: &str,
        prompt: &mut dyn Prompt,
    ) -> Result<()> {
        tracing::warn!("Database connection will not be tested with these credentials");

        let hosts = self.load_hosts()?;
        let entries = hosts
            .get(flavor.as_str())
            .filter(|entries| !entries.is_empty())
            .ok_or_else(|| DbVaultError::missing_flavor(flavor.as_str()))?;
        if !entries.contains_key(name) {
            return Err(DbVaultError::missing_database(flavor.as_str(), name));
        }

        let document = self.load_credentials()?;
        let current = match document.get(flavor.as_str()).and_then(|e| e.get(name)) {
            Some(entry) => Some(plaintext_string(
                self.encrypt_decrypt(entry.username.as_bytes(), false)?,
            )?),
            None => None,
        };

        let username = match current {
            Some(current)
                if prompt.confirm(&format!(
                    "Current username is {}. Do you wish to keep it?",
                    current
                ))? =>
            {
                current
            }
            _ => prompt.text("Username", None)?,
        };
        let password = prompt.password("Password")?;

        let credentials = Credentials::new(username, Some(password));
        self.store_credentials(flavor, name, &credentials, Some(document))?;
        tracing::info!("Credentials reset for {} database '{}'", flavor, name);
        Ok(())
    }

    /// Asks for a flavor and a name, then resets that database's credentials.
    ///
    /// # Errors
    /// Same as [`ConfigStore::reset_credentials`].
    pub fn reset_credentials_interactive(&self, prompt: &mut dyn Prompt) -> Result<(Flavor, String)> {
        let flavor = prompt.choose_flavor()?;
        self.ensure_flavor(flavor)?;
        let name = prompt.text("Name of the database", None)?;
        let name = name.trim().to_string();
        self.reset_credentials(flavor, &name, prompt)?;
        Ok((flavor, name))
    }
}
