//! Bucket handle: the encryption boundary.
//!
//! `put` seals before the value reaches redb, `get`/`for_each`/cursors open
//! after it leaves. Keys are never encrypted, so `delete` and key ordering
//! are plain pass-throughs.

use std::ops::Bound;

use redb::{AccessGuard, ReadOnlyTable, ReadableTable, ReadableTableMetadata, Table};
use sb_crypto::Sealer;

use crate::cursor::Cursor;
use crate::error::StoreError;

type RawKey = &'static [u8];

/// Key and still-sealed envelope, as stored.
pub(crate) type RawEntry = (Vec<u8>, Vec<u8>);

enum BucketTable<'tx> {
    ReadOnly(ReadOnlyTable<RawKey, RawKey>),
    Writable(Table<'tx, RawKey, RawKey>),
}

/// Runs `$body` with `$t` bound to whichever redb table backs the bucket.
macro_rules! with_table {
    ($bucket:expr, $t:ident => $body:expr) => {
        match &$bucket.table {
            BucketTable::ReadOnly($t) => $body,
            BucketTable::Writable($t) => $body,
        }
    };
}

pub struct Bucket<'tx> {
    name: String,
    table: BucketTable<'tx>,
    sealer: &'tx Sealer,
}

impl<'tx> Bucket<'tx> {
    pub(crate) fn read_only(
        name: &str,
        table: ReadOnlyTable<RawKey, RawKey>,
        sealer: &'tx Sealer,
    ) -> Self {
        Self {
            name: name.to_string(),
            table: BucketTable::ReadOnly(table),
            sealer,
        }
    }

    pub(crate) fn writable(name: &str, table: Table<'tx, RawKey, RawKey>, sealer: &'tx Sealer) -> Self {
        Self {
            name: name.to_string(),
            table: BucketTable::Writable(table),
            sealer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.table, BucketTable::Writable(_))
    }

    /// Encrypt `value` and store it under `key`. An empty value is stored as
    /// an empty plaintext, not as an absent key.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        let BucketTable::Writable(table) = &mut self.table else {
            return Err(StoreError::ReadOnlyTx);
        };
        let envelope = self.sealer.seal(value)?;
        table.insert(key, envelope.as_slice())?;
        Ok(())
    }

    /// Decrypted value for `key`, or `None` if the key was never written.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        let plaintext = with_table!(self, t => match t.get(key)? {
            Some(envelope) => Some(self.sealer.open(envelope.value())?),
            None => None,
        });
        Ok(plaintext.map(|pt| pt.to_vec()))
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        let BucketTable::Writable(table) = &mut self.table else {
            return Err(StoreError::ReadOnlyTx);
        };
        table.remove(key)?;
        Ok(())
    }

    /// Visit every entry in key order with its decrypted value. Stops at the
    /// first decryption failure or callback error.
    pub fn for_each<F>(&self, mut f: F) -> Result<(), StoreError>
    where
        F: FnMut(&[u8], &[u8]) -> Result<(), StoreError>,
    {
        with_table!(self, t => {
            for entry in t.iter()? {
                let (key, envelope) = entry?;
                let plaintext = self.sealer.open(envelope.value())?;
                f(key.value(), &plaintext)?;
            }
        });
        Ok(())
    }

    pub fn cursor(&self) -> Cursor<'_, 'tx> {
        Cursor::new(self)
    }

    /// Number of entries.
    pub fn len(&self) -> Result<u64, StoreError> {
        Ok(with_table!(self, t => t.len()?))
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    // ── Raw navigation for `Cursor` ─────────────────────────────────────────

    pub(crate) fn raw_first(&self) -> Result<Option<RawEntry>, StoreError> {
        Ok(with_table!(self, t => t.first()?.map(to_raw)))
    }

    pub(crate) fn raw_last(&self) -> Result<Option<RawEntry>, StoreError> {
        Ok(with_table!(self, t => t.last()?.map(to_raw)))
    }

    /// First entry strictly after `key`.
    pub(crate) fn raw_after(&self, key: &[u8]) -> Result<Option<RawEntry>, StoreError> {
        let entry = with_table!(self, t => t
            .range::<&[u8]>((Bound::Excluded(key), Bound::Unbounded))?
            .next()
            .transpose()?
            .map(to_raw));
        Ok(entry)
    }

    /// Last entry strictly before `key`.
    pub(crate) fn raw_before(&self, key: &[u8]) -> Result<Option<RawEntry>, StoreError> {
        let entry = with_table!(self, t => t
            .range::<&[u8]>((Bound::Unbounded, Bound::Excluded(key)))?
            .next_back()
            .transpose()?
            .map(to_raw));
        Ok(entry)
    }

    /// First entry at or after `key`.
    pub(crate) fn raw_seek(&self, key: &[u8]) -> Result<Option<RawEntry>, StoreError> {
        let entry = with_table!(self, t => t
            .range::<&[u8]>((Bound::Included(key), Bound::Unbounded))?
            .next()
            .transpose()?
            .map(to_raw));
        Ok(entry)
    }

    /// Open a raw entry's envelope, tagging failures with the entry's key.
    pub(crate) fn open_entry(&self, key: &[u8], envelope: &[u8]) -> Result<Vec<u8>, StoreError> {
        self.sealer
            .open(envelope)
            .map(|plaintext| plaintext.to_vec())
            .map_err(|source| StoreError::Entry {
                key: key.to_vec(),
                source,
            })
    }
}

fn to_raw((key, envelope): (AccessGuard<'_, RawKey>, AccessGuard<'_, RawKey>)) -> RawEntry {
    (key.value().to_vec(), envelope.value().to_vec())
}

impl std::fmt::Debug for Bucket<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.name)
            .field("writable", &self.is_writable())
            .finish()
    }
}
