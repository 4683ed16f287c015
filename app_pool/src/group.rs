//! Per-application-root bundle of workers.

use tokio_util::sync::CancellationToken;

use crate::ids::GroupKey;
use crate::list::DList;
use crate::restart::RestartWitness;

/// A cancellable handle to a live background spawner task for a group. Cancellation
/// is only honored while the spawner's spawn-engine call is in flight; see `spawner.rs`.
pub(crate) struct SpawnerHandle {
    pub cancel: CancellationToken,
    pub task: tokio::task::JoinHandle<()>,
}

pub(crate) struct Group {
    pub key: GroupKey,
    pub app_root: String,
    /// Ordered worker list. Ordering invariant: all zero-session workers precede all
    /// positive-session workers (inactive prefix, then active suffix), maintained
    /// operationally because a worker is always moved to the back on becoming active
    /// and to the front on becoming inactive again.
    pub workers: DList,
    /// `workers.len()` while the group is reachable; kept as its own field because
    /// the spec's invariants are phrased in terms of `size`, and it must remain valid
    /// immediately after detachment (when `workers` itself is gone).
    pub size: usize,
    pub max_requests: u64,
    pub min_processes: usize,
    pub spawner: Option<SpawnerHandle>,
    pub environment: String,
    pub detached: bool,
    pub restart_witness: Option<RestartWitness>,
}

impl Group {
    pub fn new(key: GroupKey, app_root: String) -> Self {
        Group {
            key,
            app_root,
            workers: DList::new(),
            size: 0,
            max_requests: 0,
            min_processes: 0,
            spawner: None,
            environment: String::new(),
            detached: false,
            restart_witness: None,
        }
    }

    pub fn spawning(&self) -> bool {
        self.spawner.is_some()
    }

    /// Whether this group is allowed to start a background spawner: it may not yet
    /// have reached its per-app capacity, if one is configured.
    pub fn spawning_allowed(&self, max_per_app: usize) -> bool {
        max_per_app == 0 || self.size < max_per_app
    }

    pub fn apply_options(&mut self, options: &crate::options::PoolOptions) {
        self.max_requests = options.max_requests;
        self.min_processes = options.min_processes;
        self.environment.clone_from(&options.environment);
    }
}
