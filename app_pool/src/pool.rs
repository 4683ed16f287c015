//! The pool core: shared state, the checkout algorithm, and the operations that
//! mutate it under `lock`. See SPEC_FULL.md §4.1–§4.3 for the algorithm this
//! module implements.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use slab::Slab;
use task_executor::Executor;
use tokio::sync::Notify;

use crate::admin::{GroupSnapshot, PoolSnapshot, WorkerSnapshot};
use crate::error::PoolError;
use crate::group::Group;
use crate::ids::{GroupKey, WorkerId, new_worker_identifier};
use crate::list::{DList, LinkKind};
use crate::options::{PoolConfig, PoolOptions};
use crate::restart::needs_restart;
use crate::spawner;
use crate::worker::{Session, SpawnEngine, Worker, WorkerRecord};

pub(crate) struct PoolState {
    pub groups: HashMap<GroupKey, Group>,
    pub slab: Slab<WorkerRecord>,
    /// Identifier-indexed lookup, maintained as a free optimization given slab storage
    /// (SPEC_FULL.md §4.1, `detach`): also the sole mechanism by which a closed session
    /// re-finds its record, sidestepping stale-slab-index reuse across detach/respawn.
    pub by_identifier: HashMap<String, WorkerId>,
    pub inactive: DList,
    pub count: usize,
    pub active: usize,
    pub max: usize,
    pub max_per_app: usize,
    pub waiting_on_global_queue: usize,
    pub max_idle_time: std::time::Duration,
    pub max_attempts: u32,
    pub shutdown: bool,
}

/// The concurrent, bounded pool of application worker processes.
pub struct Pool {
    pub(crate) state: Mutex<PoolState>,
    pub(crate) cv_new_group: Notify,
    pub(crate) cv_queue_slot: Notify,
    pub(crate) cv_cleaner: Notify,
    pub(crate) spawn_engine: Arc<dyn SpawnEngine>,
    pub(crate) executor: Executor,
    cleaner_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Pool {
    pub fn new(spawn_engine: Arc<dyn SpawnEngine>, executor: Executor, config: PoolConfig) -> Arc<Self> {
        let pool = Arc::new(Pool {
            state: Mutex::new(PoolState {
                groups: HashMap::new(),
                slab: Slab::new(),
                by_identifier: HashMap::new(),
                inactive: DList::new(),
                count: 0,
                active: 0,
                max: config.max,
                max_per_app: config.max_per_app,
                waiting_on_global_queue: 0,
                max_idle_time: config.max_idle_time,
                max_attempts: config.max_attempts,
                shutdown: false,
            }),
            cv_new_group: Notify::new(),
            cv_queue_slot: Notify::new(),
            cv_cleaner: Notify::new(),
            spawn_engine,
            executor,
            cleaner_task: Mutex::new(None),
        });

        let cleaner_handle = pool.executor.native_spawn(crate::cleaner::run(pool.clone()));
        *pool.cleaner_task.lock() = Some(cleaner_handle);

        pool
    }

    /// Shuts the pool down: stops the idle cleaner, cancels every live spawner, and
    /// marks every worker detached. Does not shut down worker processes themselves
    /// beyond invoking `Worker::shutdown` outside the lock.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            state.shutdown = true;
        }
        self.cv_cleaner.notify_waiters();
        if let Some(task) = self.cleaner_task.lock().take() {
            let _ = task.await;
        }

        let keys: Vec<GroupKey> = self.state.lock().groups.keys().cloned().collect();
        for key in keys {
            self.detach_group(&key).await;
        }
    }

    // ---- mutators (SPEC_FULL.md §4.2) ----

    pub(crate) fn set_active(&self, state: &mut PoolState, v: usize) {
        if v < state.active {
            self.cv_new_group.notify_waiters();
            self.cv_queue_slot.notify_waiters();
        }
        state.active = v;
    }

    pub(crate) fn set_count(&self, state: &mut PoolState, v: usize) {
        self.cv_queue_slot.notify_waiters();
        state.count = v;
    }

    pub fn set_max(&self, v: usize) {
        let mut state = self.state.lock();
        if v > state.max {
            self.cv_new_group.notify_waiters();
            self.cv_queue_slot.notify_waiters();
        }
        state.max = v;
    }

    pub fn set_max_per_app(&self, v: usize) {
        self.state.lock().max_per_app = v;
    }

    pub fn set_max_idle_time(&self, v: std::time::Duration) {
        self.state.lock().max_idle_time = v;
        self.cv_cleaner.notify_waiters();
    }

    // ---- checkout (SPEC_FULL.md §4.1) ----

    /// Returns a session opened on some worker for `app_root`, blocking until one is
    /// available or capacity frees. Retries up to `PoolConfig::max_attempts` times on
    /// worker crash during session open.
    pub async fn get(
        self: &Arc<Self>,
        app_root: &str,
        options: &PoolOptions,
    ) -> Result<CheckedOutSession, PoolError> {
        let group_key = GroupKey::new(options.app_group_name.as_str());
        let max_attempts = self.state.lock().max_attempts;
        let mut attempt = 0u32;

        'retry: loop {
            let id = loop {
                let mut state = self.state.lock();

                // Step 2: restart check, evaluated against whatever group currently
                // occupies this key (if any).
                let last_witnessed = state.groups.get(&group_key).and_then(|g| g.restart_witness);
                let (restart, observed) = needs_restart(app_root, options, last_witnessed);
                if restart && state.groups.contains_key(&group_key) {
                    log::info!("restart requested for group {group_key}, tearing down");
                    let (spawner, workers) = self.detach_group_locked(&mut state, &group_key);
                    if let Some(spawner) = spawner {
                        spawner.cancel.cancel();
                        let _ = self.executor.native_spawn(async move {
                            let _ = spawner.task.await;
                        });
                    }
                    for worker in workers {
                        let _ = self.executor.native_spawn(async move { worker.shutdown().await });
                    }
                }

                // Step 3: group exists (post-restart-teardown).
                if let Some(front) = state.groups.get(&group_key).and_then(|g| g.workers.front()) {
                    let front_idle = state.slab[front.0].sessions == 0;
                    if front_idle {
                        self.pick_inactive_front(&mut state, &group_key, front);
                        let group = state.groups.get_mut(&group_key).unwrap();
                        group.workers.move_to_back(&mut state.slab, LinkKind::Group, front);
                        group.restart_witness = observed;
                        group.apply_options(options);
                        self.stamp_for_checkout(&mut state, front);
                        check_invariants(&state);
                        break front;
                    }

                    // All of this group's workers are active.
                    let spawn_now = {
                        let group = state.groups.get(&group_key).unwrap();
                        !group.spawning() && group.spawning_allowed(state.max_per_app)
                    };
                    if spawn_now {
                        spawner::start(self, &mut state, group_key.clone(), app_root.to_string(), options.clone());
                    }
                    state.groups.get_mut(&group_key).unwrap().restart_witness = observed;

                    if options.use_global_queue {
                        state.waiting_on_global_queue += 1;
                        let notified = self.cv_queue_slot.notified();
                        drop(state);
                        notified.await;
                        self.state.lock().waiting_on_global_queue -= 1;
                        continue;
                    }

                    let chosen = {
                        let group = state.groups.get(&group_key).unwrap();
                        group
                            .workers
                            .iter(&state.slab, LinkKind::Group)
                            .min_by_key(|id| state.slab[id.0].sessions)
                            .expect("group non-empty: front() returned Some above")
                    };
                    let group = state.groups.get_mut(&group_key).unwrap();
                    group.workers.move_to_back(&mut state.slab, LinkKind::Group, chosen);
                    group.apply_options(options);
                    self.stamp_for_checkout(&mut state, chosen);
                    check_invariants(&state);
                    break chosen;
                }

                // Step 4: group does not exist.
                if state.active >= state.max {
                    let notified = self.cv_new_group.notified();
                    drop(state);
                    notified.await;
                    continue;
                }
                if state.count >= state.max {
                    self.evict_one_locked(&mut state);
                }
                drop(state);

                let worker = match self.spawn_engine.spawn(app_root, options).await {
                    Ok(w) => w,
                    Err(e) => return Err(PoolError::Spawn(e)),
                };

                let mut state = self.state.lock();
                let identifier = new_worker_identifier();
                let mut record = WorkerRecord::new(identifier.clone(), group_key.clone(), worker);
                record.sessions = 1;
                record.last_used = Instant::now();
                let id = WorkerId(state.slab.insert(record));
                state.by_identifier.insert(identifier, id);

                let mut group = Group::new(group_key.clone(), app_root.to_string());
                group.apply_options(options);
                group.restart_witness = observed;
                group.workers.push_back(&mut state.slab, LinkKind::Group, id);
                group.size = 1;
                let min_processes = group.min_processes;
                let spawning_allowed = group.spawning_allowed(state.max_per_app);
                state.groups.insert(group_key.clone(), group);

                let new_count = state.count + 1;
                self.set_count(&mut state, new_count);
                let new_active = state.active + 1;
                self.set_active(&mut state, new_active);

                if min_processes > 1 && spawning_allowed {
                    spawner::start(self, &mut state, group_key.clone(), app_root.to_string(), options.clone());
                }

                // Already stamped above (sessions = 1, last_used = now); nothing further
                // to do before opening a session on it. Falls through to the common
                // open-and-retry handling below rather than returning directly, so a
                // crash on this freshly spawned worker is retried like any other.
                check_invariants(&state);
                drop(state);
                break id;
            };

            // `id` was already selected and stamped (sessions/last_used/active, and the
            // inactive-LRU removal if this was a 0->1 transition) under the same lock
            // acquisition that picked it, in the loop above: see `stamp_for_checkout`.
            match self.open_session_on(id).await {
                Ok(session) => return Ok(session),
                Err(err) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(err);
                    }
                    continue 'retry;
                }
            }
        }
    }

    /// Moves an already-idle front-of-group worker out of the inactive LRU and marks
    /// it about to become active; called only while `lock` is held.
    fn pick_inactive_front(&self, state: &mut PoolState, _group_key: &GroupKey, id: WorkerId) {
        if state.slab[id.0].in_inactive {
            state.inactive.remove(&mut state.slab, LinkKind::Inactive, id);
            state.slab[id.0].in_inactive = false;
        }
    }

    /// Stamps `id` as freshly checked out: bumps `sessions`, refreshes `last_used`,
    /// and on a 0->1 transition removes it from the inactive LRU (if still present)
    /// and increments `active`. Must run in the same critical section that selected
    /// `id`, before the lock guard is ever dropped -- a worker picked under one lock
    /// acquisition and stamped under a later one could be detached in between.
    fn stamp_for_checkout(&self, state: &mut PoolState, id: WorkerId) {
        let sessions_before = state.slab[id.0].sessions;
        state.slab[id.0].last_used = Instant::now();
        state.slab[id.0].sessions = sessions_before + 1;
        if sessions_before == 0 {
            if state.slab[id.0].in_inactive {
                state.inactive.remove(&mut state.slab, LinkKind::Inactive, id);
                state.slab[id.0].in_inactive = false;
            }
            let new_active = state.active + 1;
            self.set_active(state, new_active);
        }
    }

    async fn open_session_on(self: &Arc<Self>, id: WorkerId) -> Result<CheckedOutSession, PoolError> {
        let (worker, identifier, detached) = {
            let state = self.state.lock();
            let record = &state.slab[id.0];
            (record.worker.clone(), record.identifier.clone(), record.detached.clone())
        };

        match worker.open_session().await {
            Ok(session) => Ok(CheckedOutSession {
                pool: self.clone(),
                identifier,
                detached,
                session: Some(session),
            }),
            Err(err) => {
                // The record may already be gone (e.g. torn down by a concurrent
                // restart); `detach_locked` is a no-op in that case.
                let crashed = {
                    let mut state = self.state.lock();
                    self.detach_locked(&mut state, &identifier)
                };
                if let Some(crashed) = crashed {
                    let _ = self.executor.native_spawn(async move { crashed.shutdown().await });
                }
                Err(PoolError::SessionOpen(err))
            }
        }
    }

    /// Evicts `inactive.front` (strict global LRU, SPEC_FULL.md §9 Open Questions) to
    /// make room for a new group when the pool is at `max` but not `active`. Called
    /// only while `lock` is held.
    fn evict_one_locked(&self, state: &mut PoolState) {
        let Some(victim) = state.inactive.pop_front(&mut state.slab, LinkKind::Inactive) else {
            return;
        };
        state.slab[victim.0].in_inactive = false;
        let identifier = state.slab[victim.0].identifier.clone();
        let group_key = state.slab[victim.0].group_key.clone();
        log::debug!("evicting idle worker {identifier} from group {group_key} to admit a new group");
        if let Some(worker) = self.detach_locked(state, &identifier) {
            let _ = self.executor.native_spawn(async move { worker.shutdown().await });
        }
    }

    // ---- detach (SPEC_FULL.md §4.1 `detach`, §4.3 `detach_group`) ----

    /// Removes the named worker from all structures and shuts it down. Returns
    /// whether a record was found (the worker may already be detached or never have
    /// existed).
    pub async fn detach(&self, identifier: &str) -> bool {
        let worker = {
            let mut state = self.state.lock();
            self.detach_locked(&mut state, identifier)
        };
        let found = worker.is_some();
        if let Some(worker) = worker {
            worker.shutdown().await;
        }
        found
    }

    /// Removes the named worker from all structures. Returns its `Worker` handle for
    /// the caller to shut down outside the lock, or `None` if no record was found.
    pub(crate) fn detach_locked(&self, state: &mut PoolState, identifier: &str) -> Option<Arc<dyn Worker>> {
        let id = state.by_identifier.remove(identifier)?;
        let sessions = state.slab[id.0].sessions;
        let group_key = state.slab[id.0].group_key.clone();
        let in_inactive = state.slab[id.0].in_inactive;
        let worker = state.slab[id.0].worker.clone();

        state.slab[id.0].detached.store(true, Ordering::Release);

        let mut group_now_empty = false;
        if let Some(group) = state.groups.get_mut(&group_key) {
            group.workers.remove(&mut state.slab, LinkKind::Group, id);
            group.size -= 1;
            group_now_empty = group.size == 0;
        }

        if in_inactive {
            state.inactive.remove(&mut state.slab, LinkKind::Inactive, id);
        } else if sessions > 0 {
            let new_active = state.active - 1;
            self.set_active(state, new_active);
        }

        let new_count = state.count - 1;
        self.set_count(state, new_count);

        state.slab.remove(id.0);

        if group_now_empty {
            let (spawner, orphans) = self.detach_group_locked(state, &group_key);
            if let Some(spawner) = spawner {
                spawner.cancel.cancel();
                let _ = self.executor.native_spawn(async move {
                    let _ = spawner.task.await;
                });
            }
            for orphan in orphans {
                let _ = self.executor.native_spawn(async move { orphan.shutdown().await });
            }
        }

        check_invariants(state);
        Some(worker)
    }

    /// Tears down a group entirely: every worker it still owns is detached, its
    /// background spawner (if any) is cancelled, and the group is dropped from
    /// `groups`. Awaits the spawner's cancellation acknowledgement, so must not be
    /// called while `lock` is held.
    pub async fn detach_group(&self, group_key: &GroupKey) {
        let (spawner, workers) = {
            let mut state = self.state.lock();
            self.detach_group_locked(&mut state, group_key)
        };
        for worker in workers {
            let _ = self.executor.native_spawn(async move { worker.shutdown().await });
        }
        if let Some(spawner) = spawner {
            spawner.cancel.cancel();
            let _ = spawner.task.await;
        }
    }

    /// The synchronous half of group teardown: detaches every worker the group still
    /// owns and removes the group from `groups`, returning its spawner handle (if
    /// live) and the handles of every worker it owned, for the caller to cancel/shut
    /// down outside the lock.
    fn detach_group_locked(
        &self,
        state: &mut PoolState,
        group_key: &GroupKey,
    ) -> (Option<crate::group::SpawnerHandle>, Vec<Arc<dyn Worker>>) {
        let Some(mut group) = state.groups.remove(group_key) else {
            return (None, Vec::new());
        };
        group.detached = true;

        let members: Vec<WorkerId> = group.workers.iter(&state.slab, LinkKind::Group).collect();
        let mut workers = Vec::with_capacity(members.len());
        for id in members {
            let identifier = state.slab[id.0].identifier.clone();
            state.by_identifier.remove(&identifier);
            let sessions = state.slab[id.0].sessions;
            let in_inactive = state.slab[id.0].in_inactive;
            workers.push(state.slab[id.0].worker.clone());
            state.slab[id.0].detached.store(true, Ordering::Release);

            if in_inactive {
                state.inactive.remove(&mut state.slab, LinkKind::Inactive, id);
            } else if sessions > 0 {
                let new_active = state.active - 1;
                self.set_active(state, new_active);
            }
            let new_count = state.count - 1;
            self.set_count(state, new_count);
            state.slab.remove(id.0);
        }

        let spawner = group.spawner.take();
        check_invariants(state);
        (spawner, workers)
    }

    // ---- session close (SPEC_FULL.md §4.6) ----

    /// The synchronous half of the session-close callback: pool-state mutation only.
    /// Returns the worker handle when it must be shut down (retirement), for the
    /// caller to await outside the lock.
    pub(crate) fn session_closed_sync(&self, identifier: &str, detached: &AtomicBool) -> Option<Arc<dyn Worker>> {
        // Fast path: monotone flag, safe to read without the lock (SPEC_FULL.md §9).
        if detached.load(Ordering::Acquire) {
            return None;
        }

        let mut state = self.state.lock();
        let Some(&id) = state.by_identifier.get(identifier) else {
            return None;
        };
        let group_key = state.slab[id.0].group_key.clone();
        state.slab[id.0].processed += 1;
        let processed = state.slab[id.0].processed;
        let max_requests = state.groups.get(&group_key).map_or(0, |g| g.max_requests);

        if max_requests > 0 && processed >= max_requests {
            let worker = state.slab[id.0].worker.clone();
            log::debug!("worker {identifier} retiring after {processed} sessions");
            self.detach_locked(&mut state, identifier);
            Some(worker)
        } else {
            state.slab[id.0].last_used = Instant::now();
            state.slab[id.0].sessions -= 1;
            if state.slab[id.0].sessions == 0 {
                if let Some(group) = state.groups.get_mut(&group_key) {
                    group.workers.move_to_front(&mut state.slab, LinkKind::Group, id);
                }
                state.inactive.push_back(&mut state.slab, LinkKind::Inactive, id);
                state.slab[id.0].in_inactive = true;
                let new_active = state.active - 1;
                self.set_active(&mut state, new_active);
            }
            check_invariants(&state);
            None
        }
    }

    // ---- introspection ----

    /// Opaque pass-through to the spawn engine's backtraces report. See SPEC_FULL.md
    /// §6: the pool does not parse or cache this, only relays it.
    pub async fn backtraces(&self) -> Result<String, PoolError> {
        self.spawn_engine.backtraces().await.map_err(|e| PoolError::Admin(e.to_string()))
    }

    /// Opaque pass-through to the spawn engine's own introspection dump.
    pub async fn inspect(&self) -> Result<String, PoolError> {
        self.spawn_engine.inspect().await.map_err(|e| PoolError::Admin(e.to_string()))
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.state.lock();
        let now = Instant::now();

        let groups = state
            .groups
            .values()
            .map(|g| GroupSnapshot {
                name: g.key.to_string(),
                app_root: g.app_root.clone(),
                environment: g.environment.clone(),
                size: g.size,
                min_processes: g.min_processes,
                max_requests: g.max_requests,
            })
            .collect();

        let workers = state
            .slab
            .iter()
            .map(|(_, r)| WorkerSnapshot {
                identifier: r.identifier.clone(),
                group: r.group_key.to_string(),
                pid: r.worker.pid(),
                sessions: r.sessions,
                processed: r.processed,
                uptime: now.saturating_duration_since(r.start_time),
                idle_for: now.saturating_duration_since(r.last_used),
            })
            .collect();

        PoolSnapshot {
            groups,
            workers,
            count: state.count,
            active: state.active,
            waiting_on_global_queue: state.waiting_on_global_queue,
        }
    }
}

/// Checks the structural invariants (SPEC_FULL.md §8, I1–I5; I6 holds by
/// construction since a group carries at most one `Option<SpawnerHandle>`) against
/// the current state. Must be called while `lock` is held. No-op outside debug/test
/// builds.
pub(crate) fn check_invariants(state: &PoolState) {
    let _ = state;
    #[cfg(debug_assertions)]
    {
        let sum_of_group_sizes: usize = state.groups.values().map(|g| g.size).sum();
        debug_assert_eq!(sum_of_group_sizes, state.count, "I1: group sizes must sum to count");
        debug_assert_eq!(
            state.inactive.len(),
            state.count - state.active,
            "I2: inactive count must equal count - active"
        );
        debug_assert!(state.active <= state.count, "I4: active must not exceed count");

        for group in state.groups.values() {
            let mut seen_active = false;
            for id in group.workers.iter(&state.slab, LinkKind::Group) {
                let record = &state.slab[id.0];
                debug_assert!(
                    !record.detached.load(Ordering::Relaxed),
                    "I5: a detached record must not be reachable from groups"
                );
                if record.sessions == 0 {
                    debug_assert!(!seen_active, "I3: inactive workers must form a prefix of a group's worker list");
                } else {
                    seen_active = true;
                }
            }
        }
    }
}

/// A handle to an open session, returned by `Pool::get`. Closing it (explicitly via
/// `close`, or implicitly on drop) notifies the pool so the worker can be retired or
/// returned to the inactive LRU.
pub struct CheckedOutSession {
    pool: Arc<Pool>,
    identifier: String,
    detached: Arc<AtomicBool>,
    session: Option<Box<dyn Session>>,
}

impl CheckedOutSession {
    pub fn session(&self) -> &dyn Session {
        self.session
            .as_deref()
            .expect("session accessed after close")
    }

    /// Explicitly closes the session. Equivalent to dropping the guard, except that
    /// worker shutdown on retirement is awaited here rather than spawned in the
    /// background.
    pub async fn close(mut self) {
        self.session.take();
        if let Some(worker) = self.pool.session_closed_sync(&self.identifier, &self.detached) {
            worker.shutdown().await;
        }
    }
}

impl Drop for CheckedOutSession {
    fn drop(&mut self) {
        if self.session.take().is_none() {
            return;
        }
        if let Some(worker) = self.pool.session_closed_sync(&self.identifier, &self.detached) {
            let _ = self.pool.executor.native_spawn(async move {
                worker.shutdown().await;
            });
        }
    }
}
