//! Opaque content-encryption key handle backed by the system keychain.
//!
//! The key material is created on first use and lives in the OS keychain
//! (service `streamvault`). The `STREAMVAULT_MASTER_KEY` environment
//! variable overrides the keychain for headless environments. The handle is
//! never persisted by this crate and its Debug output is redacted.

use std::env;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use rand::RngCore;

use super::hex_encode;

const KEYRING_SERVICE: &str = "streamvault";
const KEYRING_ENTRY_NAME: &str = "content-key-v1";
const KEY_LEN: usize = 32;

/// Errors for keystore access.
#[derive(Debug, thiserror::Error)]
pub enum KeystoreError {
    /// Could not access the keychain and no env fallback key was provided.
    #[error(
        "unable to access system keychain for the content encryption key; set STREAMVAULT_MASTER_KEY or configure keychain access"
    )]
    KeychainUnavailable,
}

/// Opaque reference to the content encryption key.
///
/// Obtained from the OS keychain (or env override); consumed by
/// [`crate::crypto::ContentCipher`]. The material is sensitive: it is not
/// serialized anywhere and Debug output redacts it.
#[derive(Clone)]
pub struct EncryptionKeyHandle {
    material: String,
}

impl EncryptionKeyHandle {
    /// Loads the key from the keychain, creating and storing a fresh one on
    /// first use. `STREAMVAULT_MASTER_KEY` takes precedence when set.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoreError::KeychainUnavailable`] when the keychain
    /// cannot be reached and no env override exists.
    pub fn load_or_create() -> Result<Self, KeystoreError> {
        if let Some(from_env) = env::var_os("STREAMVAULT_MASTER_KEY") {
            let material = from_env.to_string_lossy().trim().to_string();
            if !material.is_empty() {
                return Ok(Self { material });
            }
        }

        let entry = safe_keyring_entry()?;

        match safe_keyring_get_password(&entry) {
            Ok(existing) if !existing.trim().is_empty() => Ok(Self { material: existing }),
            _ => {
                let generated = generate_key_material();
                safe_keyring_set_password(&entry, &generated)?;
                Ok(Self {
                    material: generated,
                })
            }
        }
    }

    /// Wraps explicit key material. Intended for tests and for callers that
    /// manage key storage themselves.
    #[must_use]
    pub fn from_material(material: impl Into<String>) -> Self {
        Self {
            material: material.into(),
        }
    }

    /// Raw key material (sensitive - never log the return value).
    pub(crate) fn material(&self) -> &str {
        &self.material
    }
}

// Custom Debug impl that redacts the key material.
impl fmt::Debug for EncryptionKeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKeyHandle")
            .field("material", &"[REDACTED]")
            .finish()
    }
}

fn safe_keyring_entry() -> Result<keyring::Entry, KeystoreError> {
    catch_unwind(|| keyring::Entry::new(KEYRING_SERVICE, KEYRING_ENTRY_NAME))
        .map_err(|_| KeystoreError::KeychainUnavailable)?
        .map_err(|_| KeystoreError::KeychainUnavailable)
}

fn safe_keyring_get_password(entry: &keyring::Entry) -> Result<String, KeystoreError> {
    catch_unwind(AssertUnwindSafe(|| entry.get_password()))
        .map_err(|_| KeystoreError::KeychainUnavailable)?
        .map_err(|_| KeystoreError::KeychainUnavailable)
}

fn safe_keyring_set_password(entry: &keyring::Entry, password: &str) -> Result<(), KeystoreError> {
    catch_unwind(AssertUnwindSafe(|| entry.set_password(password)))
        .map_err(|_| KeystoreError::KeychainUnavailable)?
        .map_err(|_| KeystoreError::KeychainUnavailable)
}

fn generate_key_material() -> String {
    let mut bytes = [0_u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_material() {
        let handle = EncryptionKeyHandle::from_material("super-secret");
        let debug = format!("{handle:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super-secret"));
    }

    #[test]
    fn test_generated_material_is_hex() {
        let material = generate_key_material();
        assert_eq!(material.len(), KEY_LEN * 2);
        assert!(material.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_from_material_round_trip() {
        let handle = EncryptionKeyHandle::from_material("key-a");
        assert_eq!(handle.material(), "key-a");
    }
}
