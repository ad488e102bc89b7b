//! sb_store - SecureBolt: transparent value encryption over redb
//!
//! # Encryption strategy
//! redb does NOT encrypt.  We encrypt at the value boundary:
//! - Every value written through a `Bucket` is stored as an AES-256-GCM
//!   envelope (`nonce || ciphertext || tag`).
//! - Keys and bucket names stay in plaintext so ordering and range scans keep
//!   working in the underlying store.
//! - The key is derived from the user password via Argon2id with a per-file
//!   salt kept in the reserved `securebolt_meta` table, and lives only in a
//!   `SecureBuffer` until `close`.
//!
//! # Concurrency
//! `SecureDb::view` holds a shared lock for the whole read transaction,
//! `SecureDb::update` and `SecureDb::close` hold the exclusive lock.

pub mod bucket;
pub mod config;
pub mod cursor;
pub mod db;
pub mod error;
pub mod meta;
pub mod tx;

pub use bucket::Bucket;
pub use config::Options;
pub use cursor::Cursor;
pub use db::SecureDb;
pub use error::StoreError;
pub use tx::Tx;

pub use sb_crypto::{CryptoError, KdfParams};
