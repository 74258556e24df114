//! Offset-addressable content cipher and whole-file digest.
//!
//! Range serving needs to decrypt an arbitrary byte window without
//! processing the file from offset 0, so content uses XChaCha20 (a pure
//! stream cipher, seekable to any keystream position) rather than an AEAD
//! mode. Integrity is handled separately: a SHA-256 digest over the final
//! on-disk file, recorded once at download finalize time.

use std::fmt;
use std::path::Path;

use chacha20::XChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use super::hex_encode;
use super::keystore::EncryptionKeyHandle;

/// Read chunk size for the streaming file digest (64 KiB).
const DIGEST_CHUNK_SIZE: usize = 64 * 1024;

/// Per-content stream cipher addressable by byte offset.
///
/// The cipher key is derived from the keystore handle; the nonce is derived
/// from `(content_id, quality)` so every content file gets a distinct
/// keystream. Encrypt and decrypt are the same keystream XOR, applied at the
/// byte offset where the data lives in the file - a pure function of
/// `(key handle, content identity, offset)`, with no shared mutable state
/// between concurrent readers.
#[derive(Clone)]
pub struct ContentCipher {
    key: [u8; 32],
    nonce: [u8; 24],
}

impl ContentCipher {
    /// Derives the cipher for one piece of content.
    #[must_use]
    pub fn new(handle: &EncryptionKeyHandle, content_id: &str, quality: &str) -> Self {
        let key: [u8; 32] = Sha256::digest(handle.material().as_bytes()).into();

        let mut nonce_hasher = Sha256::new();
        nonce_hasher.update(b"streamvault-content-nonce");
        nonce_hasher.update(content_id.as_bytes());
        nonce_hasher.update([0x1f]);
        nonce_hasher.update(quality.as_bytes());
        let nonce_digest: [u8; 32] = nonce_hasher.finalize().into();
        let mut nonce = [0_u8; 24];
        nonce.copy_from_slice(&nonce_digest[..24]);

        Self { key, nonce }
    }

    /// Encrypts `buf` in place, where `buf` starts at byte `offset` of the
    /// plaintext file.
    pub fn encrypt_at(&self, offset: u64, buf: &mut [u8]) {
        self.apply_at(offset, buf);
    }

    /// Decrypts `buf` in place, where `buf` starts at byte `offset` of the
    /// ciphertext file.
    pub fn decrypt_at(&self, offset: u64, buf: &mut [u8]) {
        self.apply_at(offset, buf);
    }

    /// XORs the keystream at `offset` into `buf` (stream cipher: encrypt
    /// and decrypt are the same operation).
    fn apply_at(&self, offset: u64, buf: &mut [u8]) {
        let mut cipher = XChaCha20::new(&self.key.into(), &self.nonce.into());
        cipher.seek(offset);
        cipher.apply_keystream(buf);
    }
}

// Custom Debug impl that redacts derived key material.
impl fmt::Debug for ContentCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentCipher")
            .field("key", &"[REDACTED]")
            .field("nonce", &"[REDACTED]")
            .finish()
    }
}

/// Computes the SHA-256 digest of a file, streaming in fixed-size chunks.
///
/// Used at download finalize time to record the whole-file checksum.
///
/// # Errors
///
/// Returns the underlying IO error if the file cannot be read.
pub async fn file_sha256(path: &Path) -> Result<String, std::io::Error> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; DIGEST_CHUNK_SIZE];

    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hex_encode(&hasher.finalize()))
}
