use sb_crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Key cannot be empty")]
    EmptyKey,

    #[error("Metadata bucket not found (file was not created by SecureBolt or is damaged)")]
    MetadataMissing,

    #[error("Salt not found in metadata")]
    SaltMissing,

    #[error("Stored salt has invalid length {0}")]
    InvalidSalt(usize),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Failed to decrypt value for key {:?}: {source}", String::from_utf8_lossy(.key))]
    Entry {
        key: Vec<u8>,
        #[source]
        source: CryptoError,
    },

    #[error("Bucket {0:?} not found")]
    BucketNotFound(String),

    #[error("Bucket {0:?} already exists")]
    BucketExists(String),

    #[error("Bucket {0:?} already has a live handle in this transaction")]
    BucketInUse(String),

    #[error("Bucket name {0:?} is reserved")]
    ReservedBucket(String),

    #[error("Transaction is read-only")]
    ReadOnlyTx,

    #[error("Database is closed")]
    Closed,

    #[error("Storage error: {0}")]
    Storage(#[from] redb::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Callback error: {0}")]
    Callback(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wrap an error raised inside a `view`/`update`/`for_each` callback.
    pub fn callback(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        StoreError::Callback(err.into())
    }

    /// The cryptographic failure behind this error, whether it came from
    /// `Bucket::get` (`Crypto`) or from a cursor (`Entry`).
    pub fn crypto(&self) -> Option<&CryptoError> {
        match self {
            StoreError::Crypto(err) | StoreError::Entry { source: err, .. } => Some(err),
            _ => None,
        }
    }

    pub fn is_decryption_failure(&self) -> bool {
        matches!(self.crypto(), Some(CryptoError::DecryptionFailed))
    }

    pub fn is_invalid_envelope(&self) -> bool {
        matches!(self.crypto(), Some(CryptoError::InvalidEnvelope { .. }))
    }
}

impl From<redb::DatabaseError> for StoreError {
    fn from(err: redb::DatabaseError) -> Self {
        StoreError::Storage(err.into())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(err: redb::TransactionError) -> Self {
        StoreError::Storage(err.into())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(err: redb::TableError) -> Self {
        StoreError::Storage(err.into())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(err: redb::StorageError) -> Self {
        StoreError::Storage(err.into())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(err: redb::CommitError) -> Self {
        StoreError::Storage(err.into())
    }
}
