//! Reserved metadata table and salt bootstrap.
//!
//! Layout: table `securebolt_meta` holds exactly one entry, `salt` → 16 raw
//! bytes, unencrypted. It is written once, in its own transaction, when the
//! file is created and never touched again. Losing it makes every other value
//! in the file undecryptable.

use redb::{Database, TableDefinition, TableError};
use sb_crypto::kdf::{generate_salt, SALT_LEN};
use tracing::{debug, info};

use crate::error::StoreError;

pub const META_BUCKET: &str = "securebolt_meta";
pub const SALT_KEY: &[u8] = b"salt";

pub(crate) type RawTableDef<'n> = TableDefinition<'n, &'static [u8], &'static [u8]>;

const META_TABLE: RawTableDef<'static> = TableDefinition::new(META_BUCKET);

pub fn is_reserved(name: &str) -> bool {
    name == META_BUCKET
}

/// Generate a salt and persist it. Only called for a freshly created file.
pub(crate) fn bootstrap_salt(db: &Database) -> Result<[u8; SALT_LEN], StoreError> {
    let salt = generate_salt();
    let txn = db.begin_write()?;
    {
        let mut table = txn.open_table(META_TABLE)?;
        table.insert(SALT_KEY, salt.as_slice())?;
    }
    txn.commit()?;
    info!("new store file: salt generated and persisted");
    Ok(salt)
}

/// Read the salt of an existing file.
pub(crate) fn load_salt(db: &Database) -> Result<[u8; SALT_LEN], StoreError> {
    let txn = db.begin_read()?;
    let table = match txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Err(StoreError::MetadataMissing),
        Err(err) => return Err(err.into()),
    };
    let stored = table.get(SALT_KEY)?.ok_or(StoreError::SaltMissing)?;
    let bytes = stored.value();
    let salt: [u8; SALT_LEN] = bytes
        .try_into()
        .map_err(|_| StoreError::InvalidSalt(bytes.len()))?;
    debug!("salt loaded from metadata");
    Ok(salt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn bootstrap_then_load_returns_same_salt() {
        let dir = tempdir().unwrap();
        let db = Database::create(dir.path().join("meta.redb")).unwrap();
        let salt = bootstrap_salt(&db).unwrap();
        assert_eq!(load_salt(&db).unwrap(), salt);
    }

    #[test]
    fn missing_table_and_missing_salt_are_distinct() {
        let dir = tempdir().unwrap();
        let db = Database::create(dir.path().join("meta.redb")).unwrap();
        assert!(matches!(load_salt(&db), Err(StoreError::MetadataMissing)));

        let txn = db.begin_write().unwrap();
        txn.open_table(META_TABLE).unwrap();
        txn.commit().unwrap();
        assert!(matches!(load_salt(&db), Err(StoreError::SaltMissing)));
    }

    #[test]
    fn short_salt_is_rejected() {
        let dir = tempdir().unwrap();
        let db = Database::create(dir.path().join("meta.redb")).unwrap();
        let txn = db.begin_write().unwrap();
        {
            let mut table = txn.open_table(META_TABLE).unwrap();
            table.insert(SALT_KEY, &b"short"[..]).unwrap();
        }
        txn.commit().unwrap();
        assert!(matches!(load_salt(&db), Err(StoreError::InvalidSalt(5))));
    }
}
