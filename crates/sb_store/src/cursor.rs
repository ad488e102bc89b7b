//! Ordered traversal over a bucket with transparent decryption.
//!
//! redb exposes ranges rather than a stateful cursor, so the cursor keeps the
//! last visited key and asks the table for its neighbour on every step.
//! `Ok(None)` means the end of the range was reached (or `seek` found nothing);
//! it is not an error.

use crate::bucket::{Bucket, RawEntry};
use crate::error::StoreError;

/// Key and decrypted value.
pub type Entry = (Vec<u8>, Vec<u8>);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Position {
    Unset,
    At(Vec<u8>),
    BeforeFirst,
    AfterLast,
}

pub struct Cursor<'b, 'tx> {
    bucket: &'b Bucket<'tx>,
    position: Position,
}

impl<'b, 'tx> Cursor<'b, 'tx> {
    pub(crate) fn new(bucket: &'b Bucket<'tx>) -> Self {
        Self {
            bucket,
            position: Position::Unset,
        }
    }

    pub fn first(&mut self) -> Result<Option<Entry>, StoreError> {
        let raw = self.bucket.raw_first()?;
        self.settle(raw, Position::AfterLast)
    }

    pub fn last(&mut self) -> Result<Option<Entry>, StoreError> {
        let raw = self.bucket.raw_last()?;
        self.settle(raw, Position::BeforeFirst)
    }

    /// Step forward. An unpositioned cursor starts at the first entry.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<Entry>, StoreError> {
        let raw = match &self.position {
            Position::Unset | Position::BeforeFirst => self.bucket.raw_first()?,
            Position::At(key) => self.bucket.raw_after(key)?,
            Position::AfterLast => return Ok(None),
        };
        self.settle(raw, Position::AfterLast)
    }

    /// Step backward. An unpositioned cursor starts at the last entry.
    pub fn prev(&mut self) -> Result<Option<Entry>, StoreError> {
        let raw = match &self.position {
            Position::Unset | Position::AfterLast => self.bucket.raw_last()?,
            Position::At(key) => self.bucket.raw_before(key)?,
            Position::BeforeFirst => return Ok(None),
        };
        self.settle(raw, Position::BeforeFirst)
    }

    /// Position at the first key `>= seek`.
    pub fn seek(&mut self, seek: &[u8]) -> Result<Option<Entry>, StoreError> {
        let raw = self.bucket.raw_seek(seek)?;
        self.settle(raw, Position::AfterLast)
    }

    /// Move onto `raw` (or park at `exhausted` if there is none) and decrypt.
    /// The cursor advances even when decryption fails, so a caller can skip a
    /// damaged entry.
    fn settle(
        &mut self,
        raw: Option<RawEntry>,
        exhausted: Position,
    ) -> Result<Option<Entry>, StoreError> {
        let Some((key, envelope)) = raw else {
            self.position = exhausted;
            return Ok(None);
        };
        self.position = Position::At(key.clone());
        let value = self.bucket.open_entry(&key, &envelope)?;
        Ok(Some((key, value)))
    }
}

impl std::fmt::Debug for Cursor<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("bucket", &self.bucket.name())
            .field("position", &self.position)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use redb::{Database, TableDefinition};
    use sb_crypto::{CryptoError, KdfParams};
    use tempfile::tempdir;

    use crate::{Options, SecureDb, StoreError};

    fn open(path: &Path) -> SecureDb {
        let options = Options {
            kdf: KdfParams {
                time_cost: 1,
                memory_kib: 1024,
                parallelism: 1,
            },
            lock_memory: false,
            catch_interrupt: false,
        };
        let mut pw = b"cursor-pw".to_vec();
        SecureDb::open_with_options(path, 0o600, &mut pw, &options).unwrap()
    }

    #[test]
    fn cursor_moves_past_a_damaged_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cursor.db");
        let db = open(&path);
        db.update(|tx| {
            let mut b = tx.create_bucket("b")?;
            b.put(b"1", b"one")?;
            b.put(b"2", b"two")?;
            b.put(b"3", b"three")
        })
        .unwrap();
        drop(db);

        {
            let raw = Database::open(&path).unwrap();
            let txn = raw.begin_write().unwrap();
            {
                let def: TableDefinition<&[u8], &[u8]> = TableDefinition::new("b");
                let mut table = txn.open_table(def).unwrap();
                table.insert(&b"2"[..], &[0u8; 40][..]).unwrap();
            }
            txn.commit().unwrap();
        }

        let db = open(&path);
        db.view(|tx| {
            let bucket = tx.bucket("b")?;
            let mut c = bucket.cursor();
            assert_eq!(c.first()?, Some((b"1".to_vec(), b"one".to_vec())));
            match c.next() {
                Err(StoreError::Entry { key, source }) => {
                    assert_eq!(key, b"2");
                    assert!(matches!(source, CryptoError::DecryptionFailed));
                }
                other => panic!("expected damaged entry, got {other:?}"),
            }
            assert_eq!(c.next()?, Some((b"3".to_vec(), b"three".to_vec())));
            assert!(c.prev().is_err());
            assert_eq!(c.prev()?, Some((b"1".to_vec(), b"one".to_vec())));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn unpositioned_cursor_starts_at_either_end() {
        let dir = tempdir().unwrap();
        let db = open(&dir.path().join("ends.db"));
        db.update(|tx| {
            let mut b = tx.create_bucket("b")?;
            b.put(b"a", b"1")?;
            b.put(b"z", b"26")?;
            Ok(())
        })
        .unwrap();
        db.view(|tx| {
            let bucket = tx.bucket("b")?;
            assert_eq!(bucket.cursor().next()?.map(|e| e.0), Some(b"a".to_vec()));
            assert_eq!(bucket.cursor().prev()?.map(|e| e.0), Some(b"z".to_vec()));
            Ok(())
        })
        .unwrap();
    }
}
