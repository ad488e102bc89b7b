//! Transaction handle.
//!
//! A `Tx` wraps exactly one redb transaction for the duration of a
//! `SecureDb::view` / `SecureDb::update` callback and hands out `Bucket`s that
//! borrow from it. Bucket names map 1:1 to redb table names.

use redb::{ReadTransaction, Table, TableDefinition, TableError, TableHandle, WriteTransaction};
use sb_crypto::Sealer;
use tracing::{debug, warn};

use crate::bucket::Bucket;
use crate::error::StoreError;
use crate::meta::{self, RawTableDef};

enum TxKind {
    Read(ReadTransaction),
    Write(WriteTransaction),
}

pub struct Tx<'db> {
    kind: TxKind,
    sealer: &'db Sealer,
}

impl<'db> Tx<'db> {
    pub(crate) fn read_only(txn: ReadTransaction, sealer: &'db Sealer) -> Self {
        Self {
            kind: TxKind::Read(txn),
            sealer,
        }
    }

    pub(crate) fn writable(txn: WriteTransaction, sealer: &'db Sealer) -> Self {
        Self {
            kind: TxKind::Write(txn),
            sealer,
        }
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.kind, TxKind::Write(_))
    }

    /// Look up an existing bucket.
    ///
    /// In a write transaction a bucket can have only one live handle; asking
    /// for it again before the first `Bucket` is dropped fails with
    /// `BucketInUse`.
    pub fn bucket(&self, name: &str) -> Result<Bucket<'_>, StoreError> {
        check_name(name)?;
        match &self.kind {
            TxKind::Read(txn) => match txn.open_table(table_def(name)) {
                Ok(table) => Ok(Bucket::read_only(name, table, self.sealer)),
                Err(TableError::TableDoesNotExist(_)) => {
                    Err(StoreError::BucketNotFound(name.to_string()))
                }
                Err(err) => Err(err.into()),
            },
            TxKind::Write(txn) => {
                if !table_exists(txn, name)? {
                    return Err(StoreError::BucketNotFound(name.to_string()));
                }
                let table = open_writable(txn, name)?;
                Ok(Bucket::writable(name, table, self.sealer))
            }
        }
    }

    /// Create a new bucket; fails with `BucketExists` if it is already there.
    pub fn create_bucket(&self, name: &str) -> Result<Bucket<'_>, StoreError> {
        check_name(name)?;
        let txn = self.write_txn()?;
        if table_exists(txn, name)? {
            return Err(StoreError::BucketExists(name.to_string()));
        }
        let table = open_writable(txn, name)?;
        debug!(bucket = name, "bucket created");
        Ok(Bucket::writable(name, table, self.sealer))
    }

    /// Same single-handle rule as `bucket`.
    pub fn create_bucket_if_not_exists(&self, name: &str) -> Result<Bucket<'_>, StoreError> {
        check_name(name)?;
        let txn = self.write_txn()?;
        let table = open_writable(txn, name)?;
        Ok(Bucket::writable(name, table, self.sealer))
    }

    /// Delete a bucket and every value in it.
    pub fn delete_bucket(&self, name: &str) -> Result<(), StoreError> {
        check_name(name)?;
        let txn = self.write_txn()?;
        let deleted = txn
            .delete_table(table_def(name))
            .map_err(|err| in_use_or(err, name))?;
        if !deleted {
            return Err(StoreError::BucketNotFound(name.to_string()));
        }
        debug!(bucket = name, "bucket deleted");
        Ok(())
    }

    /// Names of all user buckets. The metadata table is never listed.
    pub fn bucket_names(&self) -> Result<Vec<String>, StoreError> {
        let names: Vec<String> = match &self.kind {
            TxKind::Read(txn) => txn
                .list_tables()?
                .map(|handle| handle.name().to_string())
                .collect(),
            TxKind::Write(txn) => txn
                .list_tables()?
                .map(|handle| handle.name().to_string())
                .collect(),
        };
        Ok(names
            .into_iter()
            .filter(|name| !meta::is_reserved(name))
            .collect())
    }

    pub(crate) fn commit(self) -> Result<(), StoreError> {
        match self.kind {
            TxKind::Write(txn) => txn.commit().map_err(|err| {
                warn!(error = %err, "commit failed");
                StoreError::from(err)
            }),
            TxKind::Read(_) => Ok(()),
        }
    }

    pub(crate) fn rollback(self) {
        if let TxKind::Write(txn) = self.kind {
            if let Err(err) = txn.abort() {
                warn!(error = %err, "abort failed");
            }
        }
    }

    fn write_txn(&self) -> Result<&WriteTransaction, StoreError> {
        match &self.kind {
            TxKind::Write(txn) => Ok(txn),
            TxKind::Read(_) => Err(StoreError::ReadOnlyTx),
        }
    }
}

fn table_def(name: &str) -> RawTableDef<'_> {
    TableDefinition::new(name)
}

fn open_writable<'txn>(
    txn: &'txn WriteTransaction,
    name: &str,
) -> Result<Table<'txn, &'static [u8], &'static [u8]>, StoreError> {
    txn.open_table(table_def(name))
        .map_err(|err| in_use_or(err, name))
}

fn in_use_or(err: TableError, name: &str) -> StoreError {
    match err {
        TableError::TableAlreadyOpen(..) => StoreError::BucketInUse(name.to_string()),
        other => other.into(),
    }
}

fn table_exists(txn: &WriteTransaction, name: &str) -> Result<bool, StoreError> {
    Ok(txn.list_tables()?.any(|handle| handle.name() == name))
}

fn check_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() {
        return Err(StoreError::InvalidArgument("bucket name cannot be empty"));
    }
    if meta::is_reserved(name) {
        return Err(StoreError::ReservedBucket(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_checked_before_touching_storage() {
        assert!(matches!(check_name(""), Err(StoreError::InvalidArgument(_))));
        assert!(matches!(
            check_name(meta::META_BUCKET),
            Err(StoreError::ReservedBucket(_))
        ));
        assert!(check_name("users").is_ok());
    }
}
