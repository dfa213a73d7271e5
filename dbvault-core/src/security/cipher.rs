//! AES-GCM-256 encryption of credential strings under the vault key.
//!
//! A token is the standard base64 encoding of `nonce ‖ ciphertext ‖ tag`, so
//! it can be stored directly as a JSON string in the credential document.

use crate::storage::write_atomic;
use crate::{DbVaultError, Result};
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, rand_core::RngCore},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt;
use std::path::Path;
use zeroize::Zeroizing;

/// AES-GCM nonce size: 96 bits (NIST SP 800-38D §8.2.1)
const AES_GCM_NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size: 128 bits
const AES_GCM_TAG_SIZE: usize = 16;

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// The symmetric key protecting one vault (or one subset).
///
/// Persisted as raw bytes; zeroed from memory on drop.
#[derive(Clone)]
pub struct VaultKey {
    bytes: Zeroizing<[u8; KEY_SIZE]>,
}

impl VaultKey {
    /// Generates a fresh key from the operating system CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng.fill_bytes(&mut *bytes);
        Self { bytes }
    }

    /// Wraps existing key material.
    ///
    /// # Errors
    /// Returns a configuration error if `bytes` is not exactly 32 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(DbVaultError::configuration(format!(
                "Invalid key length: expected {}, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    /// Reads a key file.
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be read, or a configuration
    /// error if it does not hold a 32-byte key.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = Zeroizing::new(
            std::fs::read(path)
                .map_err(|e| DbVaultError::io(format!("reading key {}", path.display()), e))?,
        );
        Self::from_bytes(&raw)
    }

    /// Writes the key file atomically, readable by the owner only.
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, &*self.bytes, true)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &*self.bytes
    }
}

impl PartialEq for VaultKey {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for VaultKey {}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultKey(****)")
    }
}

/// Authenticated encryption of credential strings.
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    pub fn new(key: &VaultKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes())),
        }
    }

    /// Encrypts `plaintext` and returns the base64 token bytes.
    ///
    /// # Example
    /// ```rust
    /// use dbvault_core::security::{CredentialCipher, VaultKey};
    ///
    /// let cipher = CredentialCipher::new(&VaultKey::generate());
    /// let token = cipher.encrypt(b"scott")?;
    /// assert_eq!(cipher.decrypt(&token)?, b"scott");
    /// # Ok::<(), dbvault_core::DbVaultError>(())
    /// ```
    ///
    /// # Errors
    /// Returns a configuration error if the AEAD primitive fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self.cipher.encrypt(&nonce, plaintext).map_err(|e| {
            DbVaultError::configuration(format!("Encryption failed: {}", e))
        })?;

        let mut token = Vec::with_capacity(AES_GCM_NONCE_SIZE + ciphertext.len());
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(token).into_bytes())
    }

    /// Decrypts a token produced by [`CredentialCipher::encrypt`].
    ///
    /// # Errors
    /// Returns `InvalidToken` if the token is not base64, is too short to
    /// hold a nonce and tag, was produced under another key, or was altered.
    pub fn decrypt(&self, token: &[u8]) -> Result<Vec<u8>> {
        let raw = STANDARD
            .decode(token.trim_ascii())
            .map_err(|_| DbVaultError::InvalidToken)?;

        if raw.len() < AES_GCM_NONCE_SIZE + AES_GCM_TAG_SIZE {
            return Err(DbVaultError::InvalidToken);
        }

        let (nonce, ciphertext) = raw.split_at(AES_GCM_NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| DbVaultError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cipher_round_trip() {
        let cipher = CredentialCipher::new(&VaultKey::generate());

        for plaintext in ["scott", "", "pässwörd with spaces", "tiger\n"] {
            let token = cipher.encrypt(plaintext.as_bytes()).unwrap();
            assert_ne!(token, plaintext.as_bytes());
            assert_eq!(cipher.decrypt(&token).unwrap(), plaintext.as_bytes());
        }
    }

    #[test]
    fn test_cipher_uses_fresh_nonces() {
        let cipher = CredentialCipher::new(&VaultKey::generate());
        let first = cipher.encrypt(b"same").unwrap();
        let second = cipher.encrypt(b"same").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_cipher_rejects_foreign_key() {
        let token = CredentialCipher::new(&VaultKey::generate())
            .encrypt(b"secret")
            .unwrap();
        let other = CredentialCipher::new(&VaultKey::generate());

        assert!(matches!(
            other.decrypt(&token),
            Err(DbVaultError::InvalidToken)
        ));
    }

    #[test]
    fn test_cipher_rejects_tampering() {
        let cipher = CredentialCipher::new(&VaultKey::generate());
        let token = cipher.encrypt(b"secret").unwrap();

        let mut raw = STANDARD.decode(&token).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = STANDARD.encode(raw).into_bytes();

        assert!(matches!(
            cipher.decrypt(&tampered),
            Err(DbVaultError::InvalidToken)
        ));
    }

    #[test]
    fn test_cipher_rejects_malformed_tokens() {
        let cipher = CredentialCipher::new(&VaultKey::generate());
        assert!(matches!(
            cipher.decrypt(b"not base64!!"),
            Err(DbVaultError::InvalidToken)
        ));
        assert!(matches!(
            cipher.decrypt(STANDARD.encode([0u8; 8]).as_bytes()),
            Err(DbVaultError::InvalidToken)
        ));
    }

    #[test]
    fn test_key_length_is_validated() {
        assert!(VaultKey::from_bytes(&[0u8; 16]).is_err());
        assert!(VaultKey::from_bytes(&[7u8; KEY_SIZE]).is_ok());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = VaultKey::from_bytes(&[0xAB; KEY_SIZE]).unwrap();
        assert_eq!(format!("{:?}", key), "VaultKey(****)");
    }

    #[test]
    fn test_key_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("configkey");

        let key = VaultKey::generate();
        key.save(&path).unwrap();

        assert_eq!(std::fs::read(&path).unwrap().len(), KEY_SIZE);
        assert_eq!(VaultKey::load(&path).unwrap(), key);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
