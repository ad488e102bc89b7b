//! Key derivation
//!
//! `derive_key` - Argon2id (v0x13), turns the user password and the per-file
//!   salt into the 32-byte AES-256 key. The result never exists outside a
//!   `SecureBuffer` except in a zeroized scratch array.
//!
//! `generate_salt` - 16 random bytes, created once per store file.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::secure_buffer::SecureBuffer;

pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;

pub const KDF_TIME_COST: u32 = 3;
pub const KDF_MEMORY_COST_KIB: u32 = 128 * 1024; // 128 MiB
pub const KDF_PARALLELISM: u32 = 4;

/// Argon2id cost parameters. Not persisted: a file must always be opened with
/// the parameters it was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    pub time_cost: u32,
    pub memory_kib: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            time_cost: KDF_TIME_COST,
            memory_kib: KDF_MEMORY_COST_KIB,
            parallelism: KDF_PARALLELISM,
        }
    }
}

impl KdfParams {
    fn argon2(&self) -> Result<Argon2<'static>, CryptoError> {
        let params = Params::new(
            self.memory_kib,
            self.time_cost,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| CryptoError::KeyDerivation(format!("argon2 params: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Derive the store key from `password` and `salt` into a frozen `SecureBuffer`.
///
/// The caller is responsible for wiping `password` afterwards.
pub fn derive_key(
    password: &[u8],
    salt: &[u8; SALT_LEN],
    params: &KdfParams,
    lock_memory: bool,
) -> Result<SecureBuffer, CryptoError> {
    let argon2 = params.argon2()?;
    let key = SecureBuffer::new(KEY_LEN, lock_memory)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let mut scratch = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(password, salt, &mut scratch[..])
        .map_err(|e| CryptoError::KeyDerivation(format!("argon2 derive: {e}")))?;

    key.melted()?.copy_from_slice(&scratch[..]);
    Ok(key)
}

/// Generate a fresh random salt (call once when a store file is created).
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KdfParams {
        KdfParams {
            time_cost: 1,
            memory_kib: 1024,
            parallelism: 1,
        }
    }

    fn key_bytes(key: &SecureBuffer) -> Vec<u8> {
        key.with_bytes(|b| b.to_vec()).unwrap()
    }

    #[test]
    fn defaults_match_store_format() {
        let params = KdfParams::default();
        assert_eq!(params.time_cost, 3);
        assert_eq!(params.memory_kib, 131_072);
        assert_eq!(params.parallelism, 4);
    }

    #[test]
    fn derivation_is_deterministic() {
        let salt = [7u8; SALT_LEN];
        let a = derive_key(b"hunter2", &salt, &fast(), false).unwrap();
        let b = derive_key(b"hunter2", &salt, &fast(), false).unwrap();
        assert_eq!(a.len(), KEY_LEN);
        assert_eq!(key_bytes(&a), key_bytes(&b));
        assert!(!a.is_destroyed());
    }

    #[test]
    fn password_and_salt_both_matter() {
        let salt = [7u8; SALT_LEN];
        let base = key_bytes(&derive_key(b"hunter2", &salt, &fast(), false).unwrap());
        let other_pw = key_bytes(&derive_key(b"hunter3", &salt, &fast(), false).unwrap());
        let other_salt = key_bytes(&derive_key(b"hunter2", &[8u8; SALT_LEN], &fast(), false).unwrap());
        assert_ne!(base, other_pw);
        assert_ne!(base, other_salt);
    }

    #[test]
    fn cost_parameters_change_the_key() {
        let salt = [1u8; SALT_LEN];
        let a = key_bytes(&derive_key(b"pw", &salt, &fast(), false).unwrap());
        let slower = KdfParams {
            time_cost: 2,
            ..fast()
        };
        let b = key_bytes(&derive_key(b"pw", &salt, &slower, false).unwrap());
        assert_ne!(a, b);
    }

    #[test]
    fn invalid_params_are_rejected() {
        let params = KdfParams {
            time_cost: 0,
            ..fast()
        };
        let err = derive_key(b"pw", &[0u8; SALT_LEN], &params, false).unwrap_err();
        assert!(matches!(err, CryptoError::KeyDerivation(_)));
    }

    #[test]
    fn salts_are_random() {
        assert_ne!(generate_salt(), generate_salt());
    }
}
