//! Secure memory for key material.
//!
//! A `SecureBuffer` is a fixed-size heap allocation that is page-locked with
//! `mlock` (Unix, best effort), zeroized when destroyed or dropped, and tracked
//! in a process-wide registry so the interrupt hook can wipe every live buffer
//! before the process exits.
//!
//! Buffer states:
//!   Mutable   - contents may be written (`melt`, `melted`)
//!   Frozen    - read-only; the state after construction and after every write
//!   Destroyed - wiped and released; every access fails with `KeyUnavailable`

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Once, Weak};

use parking_lot::{const_mutex, Mutex, MutexGuard};
use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::error::CryptoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Mutable,
    Frozen,
    Destroyed,
}

struct Slot {
    bytes: Box<[u8]>,
    state: BufferState,
    locked: bool,
}

impl Slot {
    fn wipe(&mut self) {
        if self.state == BufferState::Destroyed {
            return;
        }
        self.bytes.zeroize();
        if self.locked {
            unlock_region(&self.bytes);
            self.locked = false;
        }
        self.bytes = Box::default();
        self.state = BufferState::Destroyed;
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

struct Registry {
    slots: Mutex<Vec<Weak<Mutex<Slot>>>>,
}

impl Registry {
    const fn new() -> Self {
        Self {
            slots: const_mutex(Vec::new()),
        }
    }

    fn register(&self, slot: &Arc<Mutex<Slot>>) {
        let mut slots = self.slots.lock();
        slots.retain(|weak| weak.strong_count() > 0);
        slots.push(Arc::downgrade(slot));
    }

    fn purge(&self) -> usize {
        let slots = std::mem::take(&mut *self.slots.lock());
        let mut wiped = 0;
        for weak in slots {
            if let Some(slot) = weak.upgrade() {
                let mut slot = slot.lock();
                if slot.state != BufferState::Destroyed {
                    slot.wipe();
                    wiped += 1;
                }
            }
        }
        wiped
    }
}

static REGISTRY: Registry = Registry::new();
static INTERRUPT_HOOK: Once = Once::new();

/// Wipe every live secure buffer in the process. Returns how many were wiped.
pub fn purge_all() -> usize {
    REGISTRY.purge()
}

/// Install (once per process) a signal listener that purges all secure
/// buffers and exits on SIGINT/SIGTERM. No-op on non-Unix targets.
pub fn catch_interrupt() {
    INTERRUPT_HOOK.call_once(install_interrupt_hook);
}

#[cfg(unix)]
fn install_interrupt_hook() {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(err) => {
            warn!(error = %err, "cannot register interrupt hook; secrets will not be purged on signal");
            return;
        }
    };
    let spawned = std::thread::Builder::new()
        .name("sb-interrupt".into())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                let wiped = purge_all();
                warn!(signal, wiped, "interrupt received; secure buffers purged");
                std::process::exit(128 + signal);
            }
        });
    match spawned {
        Ok(_) => debug!("interrupt hook installed"),
        Err(err) => warn!(error = %err, "cannot spawn interrupt hook thread"),
    }
}

#[cfg(not(unix))]
fn install_interrupt_hook() {
    debug!("interrupt hook not supported on this platform");
}

// ── Memory locking ───────────────────────────────────────────────────────────

#[cfg(unix)]
fn lock_region(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    // SAFETY: pointer and length describe a live allocation owned by the slot.
    let ret = unsafe { libc::mlock(bytes.as_ptr().cast(), bytes.len()) };
    if ret != 0 {
        warn!(
            error = %std::io::Error::last_os_error(),
            len = bytes.len(),
            "mlock failed; key memory may be swapped to disk"
        );
        return false;
    }
    true
}

#[cfg(unix)]
fn unlock_region(bytes: &[u8]) {
    // SAFETY: same allocation that was passed to `mlock`.
    let ret = unsafe { libc::munlock(bytes.as_ptr().cast(), bytes.len()) };
    if ret != 0 {
        warn!(error = %std::io::Error::last_os_error(), "munlock failed");
    }
}

#[cfg(not(unix))]
fn lock_region(_bytes: &[u8]) -> bool {
    false
}

#[cfg(not(unix))]
fn unlock_region(_bytes: &[u8]) {}

// ── SecureBuffer ─────────────────────────────────────────────────────────────

pub struct SecureBuffer {
    slot: Arc<Mutex<Slot>>,
}

impl SecureBuffer {
    /// Allocate a zero-filled, frozen buffer of `len` bytes.
    ///
    /// With `lock_memory` the allocation is `mlock`ed; if the OS refuses
    /// (e.g. `RLIMIT_MEMLOCK`), the failure is logged and the buffer still works.
    pub fn new(len: usize, lock_memory: bool) -> Result<Self, CryptoError> {
        Self::new_in(&REGISTRY, len, lock_memory)
    }

    fn new_in(registry: &Registry, len: usize, lock_memory: bool) -> Result<Self, CryptoError> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|e| CryptoError::Allocation(e.to_string()))?;
        bytes.resize(len, 0u8);
        let bytes = bytes.into_boxed_slice();
        let locked = lock_memory && lock_region(&bytes);

        let slot = Arc::new(Mutex::new(Slot {
            bytes,
            state: BufferState::Frozen,
            locked,
        }));
        registry.register(&slot);
        Ok(Self { slot })
    }

    pub fn state(&self) -> BufferState {
        self.slot.lock().state
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == BufferState::Destroyed
    }

    /// Length in bytes; 0 once destroyed.
    pub fn len(&self) -> usize {
        self.slot.lock().bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the buffer writable.
    pub fn melt(&self) -> Result<(), CryptoError> {
        let mut slot = self.live()?;
        slot.state = BufferState::Mutable;
        Ok(())
    }

    /// Make the buffer read-only again.
    pub fn freeze(&self) -> Result<(), CryptoError> {
        let mut slot = self.live()?;
        slot.state = BufferState::Frozen;
        Ok(())
    }

    /// Wipe and release the buffer. Irreversible; calling it twice is fine.
    pub fn destroy(&self) {
        self.slot.lock().wipe();
    }

    /// Read the contents. Works in both `Mutable` and `Frozen` states.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, CryptoError> {
        let slot = self.live()?;
        Ok(f(&slot.bytes))
    }

    /// Write the contents of a buffer that was explicitly melted.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R, CryptoError> {
        let mut slot = self.live()?;
        if slot.state != BufferState::Mutable {
            return Err(CryptoError::BufferFrozen);
        }
        Ok(f(&mut slot.bytes))
    }

    /// Melt the buffer for the lifetime of the returned guard. Dropping the
    /// guard (including during unwinding) freezes the buffer again.
    pub fn melted(&self) -> Result<MeltGuard<'_>, CryptoError> {
        let mut slot = self.live()?;
        slot.state = BufferState::Mutable;
        Ok(MeltGuard { slot })
    }

    fn live(&self) -> Result<MutexGuard<'_, Slot>, CryptoError> {
        let slot = self.slot.lock();
        if slot.state == BufferState::Destroyed {
            return Err(CryptoError::KeyUnavailable);
        }
        Ok(slot)
    }
}

impl Drop for SecureBuffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for SecureBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("SecureBuffer")
            .field("len", &slot.bytes.len())
            .field("state", &slot.state)
            .field("locked", &slot.locked)
            .finish()
    }
}

/// Scoped write access to a melted `SecureBuffer`.
pub struct MeltGuard<'a> {
    slot: MutexGuard<'a, Slot>,
}

impl Deref for MeltGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.slot.bytes
    }
}

impl DerefMut for MeltGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.slot.bytes
    }
}

impl Drop for MeltGuard<'_> {
    fn drop(&mut self) {
        if self.slot.state == BufferState::Mutable {
            self.slot.state = BufferState::Frozen;
        }
    }
}
