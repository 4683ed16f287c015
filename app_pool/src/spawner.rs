//! The per-group background spawner task. See SPEC_FULL.md §4.4: cancellable only
//! during the spawn-engine call; the install step that follows is uncancellable.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::group::SpawnerHandle;
use crate::ids::{GroupKey, WorkerId, new_worker_identifier};
use crate::list::LinkKind;
use crate::options::PoolOptions;
use crate::pool::{Pool, PoolState, check_invariants};
use crate::worker::WorkerRecord;

/// Starts a background spawner for `group_key`, recording its handle on the group.
/// Must be called while `lock` is held; the caller is responsible for having already
/// checked `!group.spawning() && group.spawning_allowed(max_per_app)`.
pub(crate) fn start(
    pool: &Arc<Pool>,
    state: &mut PoolState,
    group_key: GroupKey,
    app_root: String,
    options: PoolOptions,
) {
    let cancel = CancellationToken::new();
    let task = pool
        .executor
        .native_spawn(run(pool.clone(), cancel.clone(), group_key.clone(), app_root, options));
    if let Some(group) = state.groups.get_mut(&group_key) {
        group.spawner = Some(SpawnerHandle { cancel, task });
    } else {
        // The group vanished between the caller's check and this call (shouldn't
        // happen since both occur under the same lock acquisition, but the task is
        // already spawned; cancel it defensively).
        cancel.cancel();
    }
}

async fn run(pool: Arc<Pool>, cancel: CancellationToken, group_key: GroupKey, app_root: String, options: PoolOptions) {
    loop {
        let spawned = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = pool.spawn_engine.spawn(&app_root, &options) => Some(result),
        };

        let worker = match spawned {
            None => {
                clear_spawner(&pool, &group_key);
                return;
            }
            Some(Err(e)) => {
                clear_spawner(&pool, &group_key);
                log::error!("background spawn failed for group {group_key}: {e}");
                pool.detach_group(&group_key).await;
                return;
            }
            Some(Ok(worker)) => worker,
        };

        // Install step: uncancellable.
        let mut state = pool.state.lock();
        if !state.groups.contains_key(&group_key) {
            drop(state);
            worker.shutdown().await;
            return;
        }

        let identifier = new_worker_identifier();
        let mut record = WorkerRecord::new(identifier.clone(), group_key.clone(), worker);
        record.in_inactive = true;
        let id = WorkerId(state.slab.insert(record));
        state.by_identifier.insert(identifier, id);

        let group = state.groups.get_mut(&group_key).expect("checked above");
        group.workers.push_front(&mut state.slab, LinkKind::Group, id);
        group.size += 1;
        state.inactive.push_back(&mut state.slab, LinkKind::Inactive, id);

        let new_count = state.count + 1;
        pool.set_count(&mut state, new_count);

        let max_per_app = state.max_per_app;
        let group = state.groups.get(&group_key).unwrap();
        let done = group.size >= group.min_processes || !group.spawning_allowed(max_per_app);
        check_invariants(&state);

        if done {
            if let Some(group) = state.groups.get_mut(&group_key) {
                group.spawner = None;
            }
            return;
        }
        // Otherwise loop and spawn another.
    }
}

fn clear_spawner(pool: &Arc<Pool>, group_key: &GroupKey) {
    let mut state = pool.state.lock();
    if let Some(group) = state.groups.get_mut(group_key) {
        group.spawner = None;
    }
}
