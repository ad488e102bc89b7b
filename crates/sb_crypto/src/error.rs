use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Secure buffer allocation failed: {0}")]
    Allocation(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Key not available: secure buffer has been destroyed")]
    KeyUnavailable,

    #[error("Secure buffer is frozen; melt it before writing")]
    BufferFrozen,

    #[error("AEAD encryption failed")]
    EncryptionFailed,

    #[error("Invalid envelope: {len} bytes, expected at least {min}")]
    InvalidEnvelope { len: usize, min: usize },

    #[error("AEAD decryption failed (authentication tag mismatch: wrong key or tampered data)")]
    DecryptionFailed,
}

impl CryptoError {
    /// True for failures that mean the stored bytes cannot be trusted:
    /// a truncated envelope or an authentication failure.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            CryptoError::InvalidEnvelope { .. } | CryptoError::DecryptionFailed
        )
    }
}
