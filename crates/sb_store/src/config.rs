use sb_crypto::KdfParams;
use serde::{Deserialize, Serialize};

/// File mode applied when `SecureDb::open` creates a new store file (Unix).
pub const DEFAULT_FILE_MODE: u32 = 0o600;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Argon2id cost. Must match the parameters the file was created with,
    /// otherwise every value fails authentication.
    pub kdf: KdfParams,
    /// `mlock` the key buffer.
    pub lock_memory: bool,
    /// Install the process-wide SIGINT/SIGTERM hook that wipes key memory.
    pub catch_interrupt: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            lock_memory: true,
            catch_interrupt: true,
        }
    }
}
