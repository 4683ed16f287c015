//! Per-request options and process-wide tunables.

use std::path::PathBuf;
use std::time::Duration;

/// Fields recognized on a `get` call. Mirrors PoolOptions from SPEC_FULL.md §6.
#[derive(Clone, Debug)]
pub struct PoolOptions {
    /// Key into `groups`.
    pub app_group_name: String,
    /// Per-worker session limit (0 = unlimited); applied to the group.
    pub max_requests: u64,
    /// Floor respected by the idle cleaner and which triggers a warm background spawn.
    pub min_processes: usize,
    /// Chooses global-queue vs. per-worker selection when all of a group's workers are busy.
    pub use_global_queue: bool,
    /// Restart-witness location resolution (SPEC_FULL.md §4.5): if unset, `app_root/tmp`;
    /// if absolute, used as-is; otherwise `app_root/<restart_dir>`.
    pub restart_dir: Option<PathBuf>,
    /// Opaque tag stored on the group, surfaced through the admin channel.
    pub environment: String,
}

impl PoolOptions {
    pub fn new(app_group_name: impl Into<String>) -> Self {
        PoolOptions {
            app_group_name: app_group_name.into(),
            max_requests: 0,
            min_processes: 0,
            use_global_queue: false,
            restart_dir: None,
            environment: String::new(),
        }
    }
}

/// Process-wide tunables. Changeable at runtime; changes to `max` and `max_per_app`
/// signal the relevant condition variables (see `pool.rs`'s mutators).
#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
    pub max: usize,
    pub max_per_app: usize,
    /// Zero disables the idle cleaner entirely.
    pub max_idle_time: Duration,
    pub max_attempts: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max: 32,
            max_per_app: 32,
            max_idle_time: Duration::from_secs(5 * 60),
            max_attempts: 10,
        }
    }
}
