//! Store handle.
//!
//! `SecureDb` owns the redb database, the derived key and the sealer built from
//! it. All of them sit behind one `RwLock`: `view` holds it shared for the
//! whole read transaction, `update` and `close` hold it exclusively, so the
//! key can never be destroyed under a running transaction.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use redb::Database;
use sb_crypto::kdf::{self, SALT_LEN};
use sb_crypto::{secure_buffer, Sealer, SecureBuffer};
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::config::Options;
use crate::error::StoreError;
use crate::meta;
use crate::tx::Tx;

struct Inner {
    db: Database,
    key: Arc<SecureBuffer>,
    sealer: Sealer,
}

pub struct SecureDb {
    path: PathBuf,
    salt: [u8; SALT_LEN],
    inner: RwLock<Option<Inner>>,
}

impl SecureDb {
    /// Open (or create) the store at `path` with default options.
    ///
    /// `mode` is the Unix permission mode used if the file has to be created.
    /// `password` is zeroized in place before this returns, on success and on
    /// failure.
    pub fn open<P: AsRef<Path>>(
        path: P,
        mode: u32,
        password: &mut [u8],
    ) -> Result<Self, StoreError> {
        Self::open_with_options(path, mode, password, &Options::default())
    }

    pub fn open_with_options<P: AsRef<Path>>(
        path: P,
        mode: u32,
        password: &mut [u8],
        options: &Options,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let result = validate_open_args(path, password)
            .and_then(|()| Self::open_inner(path, mode, password, options));
        password.zeroize();
        result
    }

    fn open_inner(
        path: &Path,
        mode: u32,
        password: &mut [u8],
        options: &Options,
    ) -> Result<Self, StoreError> {
        if options.catch_interrupt {
            secure_buffer::catch_interrupt();
        }

        let is_new = !path.exists();
        if !is_new {
            return Self::open_db(path, false, password, options);
        }

        create_file(path, mode)?;
        let result = Self::open_db(path, true, password, options);
        if let Err(err) = &result {
            // A half-initialised file would later look like one with a lost salt.
            warn!(path = %path.display(), error = %err, "bootstrap failed; removing new store file");
            if let Err(rm_err) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %rm_err, "cannot remove store file");
            }
        }
        result
    }

    fn open_db(
        path: &Path,
        is_new: bool,
        password: &mut [u8],
        options: &Options,
    ) -> Result<Self, StoreError> {
        // Every early return below drops `db` (closing the file) and any key
        // buffer already allocated.
        let db = Database::create(path)?;

        let salt = if is_new {
            meta::bootstrap_salt(&db)?
        } else {
            meta::load_salt(&db)?
        };

        let key = kdf::derive_key(password, &salt, &options.kdf, options.lock_memory);
        password.zeroize();
        let key = Arc::new(key?);
        let sealer = Sealer::new(Arc::clone(&key))?;

        info!(path = %path.display(), created = is_new, "secure store opened");
        Ok(Self {
            path: path.to_path_buf(),
            salt,
            inner: RwLock::new(Some(Inner { db, key, sealer })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().is_none()
    }

    /// Run `f` inside a read-only transaction. Any number of views may run
    /// concurrently; none runs while an `update` is in progress.
    pub fn view<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Tx<'_>) -> Result<R, StoreError>,
    {
        let guard = self.inner.read();
        let inner = guard.as_ref().ok_or(StoreError::Closed)?;
        let tx = Tx::read_only(inner.db.begin_read()?, &inner.sealer);
        f(&tx)
    }

    /// Run `f` inside a read-write transaction under the exclusive lock.
    ///
    /// Commits when `f` returns `Ok`; rolls back when it returns `Err` or
    /// panics (the panic is resumed after the rollback).
    pub fn update<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Tx<'_>) -> Result<R, StoreError>,
    {
        let guard = self.inner.write();
        let inner = guard.as_ref().ok_or(StoreError::Closed)?;
        let tx = Tx::writable(inner.db.begin_write()?, &inner.sealer);

        match panic::catch_unwind(AssertUnwindSafe(|| f(&tx))) {
            Ok(Ok(value)) => {
                tx.commit()?;
                Ok(value)
            }
            Ok(Err(err)) => {
                debug!(error = %err, "update callback failed; rolling back");
                tx.rollback();
                Err(err)
            }
            Err(payload) => {
                tx.rollback();
                panic::resume_unwind(payload)
            }
        }
    }

    /// Destroy the key, then close the underlying file.
    ///
    /// Waits for in-flight transactions. Closing an already closed store is a
    /// no-op; every later `view`/`update` fails with `StoreError::Closed`.
    pub fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.inner.write();
        let Some(inner) = guard.take() else {
            return Ok(());
        };
        inner.key.destroy();
        drop(inner);
        info!(path = %self.path.display(), "secure store closed");
        Ok(())
    }
}

impl Drop for SecureDb {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.get_mut().take() {
            inner.key.destroy();
        }
    }
}

impl std::fmt::Debug for SecureDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureDb")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn validate_open_args(path: &Path, password: &[u8]) -> Result<(), StoreError> {
    if path.as_os_str().is_empty() {
        return Err(StoreError::InvalidArgument("path cannot be empty"));
    }
    if password.is_empty() {
        return Err(StoreError::InvalidArgument("password cannot be empty"));
    }
    Ok(())
}

#[cfg(unix)]
fn create_file(path: &Path, mode: u32) -> Result<(), StoreError> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_file(path: &Path, _mode: u32) -> Result<(), StoreError> {
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_crypto::KdfParams;
    use tempfile::tempdir;

    fn fast_options() -> Options {
        Options {
            kdf: KdfParams {
                time_cost: 1,
                memory_kib: 1024,
                parallelism: 1,
            },
            lock_memory: false,
            catch_interrupt: false,
        }
    }

    fn open(path: &Path, password: &str) -> Result<SecureDb, StoreError> {
        let mut pw = password.as_bytes().to_vec();
        SecureDb::open_with_options(path, 0o600, &mut pw, &fast_options())
    }

    #[test]
    fn empty_path_and_password_are_rejected() {
        let dir = tempdir().unwrap();
        let mut pw = b"pw".to_vec();
        assert!(matches!(
            SecureDb::open_with_options("", 0o600, &mut pw, &fast_options()),
            Err(StoreError::InvalidArgument(_))
        ));
        let mut empty: Vec<u8> = Vec::new();
        assert!(matches!(
            SecureDb::open_with_options(dir.path().join("x.db"), 0o600, &mut empty, &fast_options()),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(!dir.path().join("x.db").exists());
    }

    #[test]
    fn password_is_wiped_after_open() {
        let dir = tempdir().unwrap();
        let mut pw = b"correct horse battery staple".to_vec();
        let db = SecureDb::open_with_options(dir.path().join("w.db"), 0o600, &mut pw, &fast_options())
            .unwrap();
        assert!(pw.iter().all(|&b| b == 0));
        db.close().unwrap();
    }

    #[test]
    fn password_is_wiped_when_arguments_are_rejected() {
        let mut pw = b"secret".to_vec();
        assert!(matches!(
            SecureDb::open_with_options("", 0o600, &mut pw, &fast_options()),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(pw.iter().all(|&b| b == 0), "password left intact: {pw:?}");
    }

    #[test]
    fn password_is_wiped_when_the_file_is_not_a_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foreign.db");
        drop(Database::create(&path).unwrap());

        let mut pw = b"secret".to_vec();
        assert!(matches!(
            SecureDb::open_with_options(&path, 0o600, &mut pw, &fast_options()),
            Err(StoreError::MetadataMissing)
        ));
        assert!(pw.iter().all(|&b| b == 0));
    }

    #[test]
    fn salt_is_stable_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("salt.db");
        let first = open(&path, "pw").unwrap();
        let salt = *first.salt();
        first.close().unwrap();
        drop(first);

        let second = open(&path, "pw").unwrap();
        assert_eq!(*second.salt(), salt);
    }

    #[test]
    fn close_destroys_key_and_blocks_further_use() {
        let dir = tempdir().unwrap();
        let db = open(&dir.path().join("c.db"), "pw").unwrap();
        let key = {
            let guard = db.inner.read();
            Arc::clone(&guard.as_ref().unwrap().key)
        };
        db.close().unwrap();
        assert!(key.is_destroyed());
        assert!(db.is_closed());
        assert!(matches!(db.view(|_| Ok(())), Err(StoreError::Closed)));
        assert!(matches!(db.update(|_| Ok(())), Err(StoreError::Closed)));
        db.close().unwrap();
    }

    #[test]
    fn drop_destroys_key() {
        let dir = tempdir().unwrap();
        let db = open(&dir.path().join("d.db"), "pw").unwrap();
        let key = Arc::clone(&db.inner.read().as_ref().unwrap().key);
        drop(db);
        assert!(key.is_destroyed());
    }

    #[cfg(unix)]
    #[test]
    fn new_file_gets_requested_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join("mode.db");
        let db = open(&path, "pw").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        db.close().unwrap();
    }
}
