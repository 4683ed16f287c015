//! Error surface. See SPEC_FULL.md §7: capacity exhaustion is deliberately absent
//! from this enum because it is never surfaced to a caller, only resolved by waiting.

use std::fmt;

use crate::worker::SpawnError;

#[derive(Debug)]
pub enum PoolError {
    /// The spawn engine failed, either synchronously in the foreground path of `get`,
    /// or in the background spawner (in which case the group was torn down and this
    /// error was re-raised by a subsequent foreground `get`).
    Spawn(SpawnError),
    /// `open_session` failed on every one of `PoolConfig::max_attempts` selected
    /// workers; carries the error from the final attempt.
    SessionOpen(String),
    /// An admin-channel query failed for a reason unrelated to pool state (bad role,
    /// rejected credential, truncated channel). Never affects pool state.
    Admin(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Spawn(e) => write!(f, "failed to spawn worker: {e}"),
            PoolError::SessionOpen(e) => write!(f, "failed to open session: {e}"),
            PoolError::Admin(e) => write!(f, "admin request failed: {e}"),
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PoolError::Spawn(e) => Some(e),
            PoolError::SessionOpen(_) | PoolError::Admin(_) => None,
        }
    }
}

impl From<SpawnError> for PoolError {
    fn from(e: SpawnError) -> Self {
        PoolError::Spawn(e)
    }
}
