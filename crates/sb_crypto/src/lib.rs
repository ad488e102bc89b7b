//! sb_crypto - SecureBolt cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Key material lives only in a `SecureBuffer` and is wiped on destroy/drop.
//! - Every failure is a typed `CryptoError`; truncation and tampering are
//!   reported as different variants.
//!
//! # Module layout
//! - `secure_buffer` - page-locked, wipeable key memory + interrupt purge
//! - `kdf`           - Argon2id password → key derivation, salt generation
//! - `aead`          - AES-256-GCM value envelopes (nonce || ciphertext+tag)
//! - `error`         - unified error type

pub mod aead;
pub mod error;
pub mod kdf;
pub mod secure_buffer;

pub use aead::Sealer;
pub use error::CryptoError;
pub use kdf::KdfParams;
pub use secure_buffer::SecureBuffer;
