//! The two capability interfaces the pool consumes, and the per-worker bookkeeping
//! record it keeps internally. Neither `Worker` nor `SpawnEngine` is implemented by
//! this crate: they are narrow interfaces onto collaborators that live outside the
//! pool's scope (the spawn engine that starts processes, and the session transport
//! that talks to them).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use async_trait::async_trait;

use crate::ids::GroupKey;
use crate::list::Links;
use crate::options::PoolOptions;

/// A single request/response exchange over an opened connection to a worker. The
/// pool never inspects a session's contents; it only needs to know when one closes,
/// which is communicated by dropping (or explicitly closing) the `CheckedOutSession`
/// the pool hands back from `Pool::get`, not by this trait.
pub trait Session: Send {}

/// An opaque reference to a live worker process.
///
/// A worker's liveness is observable only through `open_session` failing: there is no
/// separate health check, mirroring how the pool itself treats a crash.
#[async_trait]
pub trait Worker: Send + Sync + fmt::Debug {
    async fn open_session(&self) -> Result<Box<dyn Session>, String>;

    fn pid(&self) -> u32;

    async fn shutdown(&self);
}

/// Errors a `SpawnEngine` may raise. Distinct from `PoolError` (see `error.rs`): this
/// is the error type of the *external* collaborator, which the pool wraps into
/// `PoolError::Spawn` wherever it surfaces one to a caller.
#[derive(Debug, Clone)]
pub struct SpawnError(pub String);

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for SpawnError {}

/// Given `(app_root, options)`, produces a running worker. Thread-safe; may take
/// arbitrary time; cancellable by dropping the future the pool awaits on it.
#[async_trait]
pub trait SpawnEngine: Send + Sync {
    async fn spawn(
        &self,
        app_root: &str,
        options: &PoolOptions,
    ) -> Result<Arc<dyn Worker>, SpawnError>;

    /// Opaque textual backtraces of every worker this engine has spawned, exactly as
    /// it reports them. The pool does not parse, cache, or otherwise interpret this.
    async fn backtraces(&self) -> Result<String, SpawnError>;

    /// An opaque textual dump of the spawn engine's own internal state, for operator
    /// debugging. Same pass-through contract as `backtraces`.
    async fn inspect(&self) -> Result<String, SpawnError>;
}

/// Per-worker metadata tracked by the pool. Never exposed directly: the admin
/// channel reads a `WorkerSnapshot` (see `admin.rs`) and callers hold a
/// `CheckedOutSession` (see `pool.rs`), neither of which leaks this type or the
/// underlying `Worker` handle.
pub(crate) struct WorkerRecord {
    pub identifier: String,
    pub group_key: GroupKey,
    pub worker: Arc<dyn Worker>,
    pub start_time: Instant,
    pub last_used: Instant,
    pub processed: u64,
    pub sessions: u32,
    /// Write-once `false -> true`. Readable without the pool lock (`Ordering::Acquire`)
    /// as an optimization in the session-close fast path; the authoritative read is
    /// always taken under the lock. See SPEC_FULL.md Open Questions.
    pub detached: Arc<AtomicBool>,
    /// Whether this record currently occupies a slot in the pool-wide inactive LRU.
    /// Tracked explicitly because `Links` alone can't distinguish "not a member" from
    /// "sole member" of a list.
    pub in_inactive: bool,
    pub group_links: Links,
    pub inactive_links: Links,
}

impl WorkerRecord {
    pub fn new(identifier: String, group_key: GroupKey, worker: Arc<dyn Worker>) -> Self {
        let now = Instant::now();
        WorkerRecord {
            identifier,
            group_key,
            worker,
            start_time: now,
            last_used: now,
            processed: 0,
            sessions: 0,
            detached: Arc::new(AtomicBool::new(false)),
            in_inactive: false,
            group_links: Links::default(),
            inactive_links: Links::default(),
        }
    }
}
