//! Content encryption: keystore handle and offset-addressable cipher.
//!
//! Downloaded media can be encrypted at rest. The key is obtained from the
//! OS keychain as an opaque [`EncryptionKeyHandle`] (never persisted or
//! logged by this crate), and content bytes go through [`ContentCipher`], an
//! XChaCha20 stream cipher that can encrypt or decrypt any byte window
//! directly at its file offset. Whole-file integrity is a SHA-256 digest
//! recorded when a download finalizes.

mod cipher;
mod keystore;

pub use cipher::{ContentCipher, file_sha256};
pub use keystore::{EncryptionKeyHandle, KeystoreError};

/// Hex-encodes bytes (lowercase).
pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}
