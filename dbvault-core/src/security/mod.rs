//! Credential protection: the vault key, the AES-GCM credential cipher, and
//! the zeroizing container handed to connectors.
//!
//! # Security Guarantees
//! - Key bytes and decrypted credentials live in `Zeroizing` containers
//! - Every encryption uses a fresh random 96-bit nonce
//! - Tampered or foreign tokens fail with `InvalidToken`, never garbage

mod cipher;
mod credentials;

pub use cipher::{CredentialCipher, KEY_SIZE, VaultKey};
pub use credentials::Credentials;
