//! Introspection: the read-side snapshot the administration channel queries.
//!
//! Snapshots are immutable copies of names and numeric fields; no `Worker` handle
//! ever escapes through this path.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct GroupSnapshot {
    pub name: String,
    pub app_root: String,
    pub environment: String,
    pub size: usize,
    pub min_processes: usize,
    pub max_requests: u64,
}

#[derive(Clone, Debug)]
pub struct WorkerSnapshot {
    pub identifier: String,
    pub group: String,
    pub pid: u32,
    pub sessions: u32,
    pub processed: u64,
    pub uptime: Duration,
    /// How long since this worker's `last_used` timestamp, i.e. how long it has sat
    /// idle (zero if it currently has open sessions and was just touched).
    pub idle_for: Duration,
}

#[derive(Clone, Debug, Default)]
pub struct PoolSnapshot {
    pub groups: Vec<GroupSnapshot>,
    pub workers: Vec<WorkerSnapshot>,
    pub count: usize,
    pub active: usize,
    pub waiting_on_global_queue: usize,
}
