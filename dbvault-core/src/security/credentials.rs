//! Decrypted credential container with automatic memory zeroing.

use std::fmt;
use zeroize::{Zeroize, Zeroizing};

/// Plaintext username and password handed to a connector.
///
/// Both fields are cleared when the value is dropped, and `Debug` output
/// never shows the password.
///
/// # Example
///
/// ```rust
/// use dbvault_core::security::Credentials;
///
/// let creds = Credentials::new("scott".to_string(), Some("tiger".to_string()));
/// assert_eq!(creds.username(), "scott");
/// assert!(!format!("{:?}", creds).contains("tiger"));
/// ```
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct Credentials {
    pub username: Zeroizing<String>,
    pub password: Zeroizing<Option<String>>,
}

impl Credentials {
    pub fn new(username: String, password: Option<String>) -> Self {
        Self {
            username: Zeroizing::new(username),
            password: Zeroizing::new(password),
        }
    }

    /// Credentials for backends that do not authenticate (e.g. SQLite files).
    pub fn anonymous() -> Self {
        Self::new(String::new(), None)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Checks if password is present without exposing it.
    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &*self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_new() {
        let creds = Credentials::new("testuser".to_string(), Some("testpass".to_string()));
        assert_eq!(creds.username(), "testuser");
        assert_eq!(creds.password(), Some("testpass"));
        assert!(creds.has_password());
    }

    #[test]
    fn test_credentials_anonymous() {
        let creds = Credentials::anonymous();
        assert_eq!(creds.username(), "");
        assert!(!creds.has_password());
    }

    #[test]
    fn test_credentials_debug_masks_password() {
        let creds = Credentials::new("user".to_string(), Some("hunter2".to_string()));
        let debug = format!("{:?}", creds);
        assert!(debug.contains("user"));
        assert!(debug.contains("****"));
        assert!(!debug.contains("hunter2"));
    }
}
