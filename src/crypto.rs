//! Optional encryption of sidecar payloads.
//!
//! The key is derived from the configured passphrase with
//! PBKDF2-HMAC-SHA256 over a fixed application salt, so two instances
//! sharing a passphrase derive the same key without coordination. Payloads
//! are sealed with AES-256-GCM and shipped as `base64(nonce || ciphertext
//! || tag)`.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

/// Fixed KDF salt. Changing this orphans every sidecar written before the
/// change.
const KDF_SALT: &[u8] = b"sherpa-dns";

/// PBKDF2 iteration count.
const KDF_ITERATIONS: u32 = 100_000;

/// AES-GCM nonce size in bytes.
const NONCE_SIZE: usize = 12;

/// Seals and opens sidecar payloads under a passphrase-derived key.
#[derive(Clone)]
pub struct PayloadCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCipher").finish_non_exhaustive()
    }
}

impl PayloadCipher {
    /// Derive the AES-256 key from `passphrase` and build a cipher.
    pub fn new(passphrase: &str) -> Self {
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), KDF_SALT, KDF_ITERATIONS, &mut key);
        let key = Key::<Aes256Gcm>::from_slice(&key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        // Encryption only fails on absurd plaintext lengths; TXT payloads
        // are capped at 255 bytes well before that.
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .unwrap_or_default();
        let mut wire = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        wire.extend_from_slice(nonce.as_slice());
        wire.extend_from_slice(&ciphertext);
        BASE64.encode(wire)
    }

    /// Decrypt a wire payload. Any malformed, truncated, or wrong-key input
    /// yields `None`; callers treat such sidecars as foreign.
    pub fn decrypt(&self, wire: &str) -> Option<String> {
        let bytes = BASE64.decode(wire.trim()).ok()?;
        if bytes.len() <= NONCE_SIZE {
            return None;
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .ok()?;
        String::from_utf8(plaintext).ok()
    }
}
