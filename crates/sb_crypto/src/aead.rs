//! Authenticated value envelopes
//!
//! Uses AES-256-GCM (96-bit nonce, 128-bit tag), no associated data.
//! Key size: 32 bytes.  Nonce: 12 bytes (random, fresh per seal).
//!
//! Envelope wire format:
//!   [ nonce (12 bytes) | ciphertext | tag (16 bytes) ]

use std::fmt;
use std::sync::Arc;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::kdf::KEY_LEN;
use crate::secure_buffer::SecureBuffer;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
/// Bytes added to every value: nonce + tag.
pub const OVERHEAD: usize = NONCE_LEN + TAG_LEN;

/// Seals and opens envelopes with one key for the lifetime of a store.
///
/// The cipher is keyed once at construction. Every call first checks the
/// backing `SecureBuffer`; once it is destroyed the sealer refuses to work.
///
/// The expanded AES key schedule lives inside `cipher`, outside the
/// `SecureBuffer`, and its first round keys are the key itself. It is wiped
/// when the sealer is dropped (`aes` built with `zeroize`), so the owner must
/// drop the sealer, not only destroy the buffer.
pub struct Sealer {
    cipher: Aes256Gcm,
    key: Arc<SecureBuffer>,
}

impl Sealer {
    pub fn new(key: Arc<SecureBuffer>) -> Result<Self, CryptoError> {
        let cipher = key
            .with_bytes(Aes256Gcm::new_from_slice)?
            .map_err(|_| CryptoError::InvalidKey(format!("expected a {KEY_LEN}-byte key")))?;
        Ok(Self { cipher, key })
    }

    /// Encrypt `plaintext` under a fresh random nonce and return the envelope.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.ensure_key()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Verify and decrypt an envelope produced by `seal`.
    pub fn open(&self, envelope: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.ensure_key()?;
        if envelope.len() < NONCE_LEN {
            return Err(CryptoError::InvalidEnvelope {
                len: envelope.len(),
                min: NONCE_LEN,
            });
        }
        let (nonce, ciphertext) = envelope.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        Ok(Zeroizing::new(plaintext))
    }

    pub fn is_usable(&self) -> bool {
        !self.key.is_destroyed()
    }

    fn ensure_key(&self) -> Result<(), CryptoError> {
        if self.key.is_destroyed() {
            return Err(CryptoError::KeyUnavailable);
        }
        Ok(())
    }
}

impl fmt::Debug for Sealer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sealer")
            .field("algorithm", &"AES-256-GCM")
            .field("key", &self.key)
            .finish()
    }
}
