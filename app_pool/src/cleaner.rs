//! The idle cleaner background task. See SPEC_FULL.md §4.7: evicts workers idle
//! beyond `max_idle_time`, respecting each group's `min_processes` floor, oldest
//! first.

use std::sync::Arc;
use std::time::Instant;

use crate::ids::WorkerId;
use crate::list::LinkKind;
use crate::pool::{Pool, check_invariants};

pub(crate) async fn run(pool: Arc<Pool>) {
    loop {
        let (max_idle_time, notified) = {
            let state = pool.state.lock();
            if state.shutdown {
                return;
            }
            (state.max_idle_time, pool.cv_cleaner.notified())
        };

        if max_idle_time.is_zero() {
            notified.await;
        } else {
            tokio::select! {
                () = notified => {}
                () = tokio::time::sleep(max_idle_time) => {}
            }
        }

        if pool.state.lock().shutdown {
            return;
        }

        sweep(&pool);
    }
}

fn sweep(pool: &Arc<Pool>) {
    let mut state = pool.state.lock();
    let max_idle_time = state.max_idle_time;
    if max_idle_time.is_zero() {
        return;
    }
    let now = Instant::now();

    let candidates: Vec<WorkerId> = state.inactive.iter(&state.slab, LinkKind::Inactive).collect();
    for id in candidates {
        let Some(record) = state.slab.get(id.0) else {
            continue;
        };
        // Oldest-first order: once one candidate is within the window, everything
        // behind it in the LRU is even fresher, but other groups further back may
        // still be individually stale, so scanning continues rather than breaking.
        if now.saturating_duration_since(record.last_used) <= max_idle_time {
            continue;
        }

        let group_key = record.group_key.clone();
        let identifier = record.identifier.clone();
        let at_floor = state
            .groups
            .get(&group_key)
            .map_or(true, |g| g.size <= g.min_processes);
        if at_floor {
            continue;
        }

        log::debug!("idle cleaner evicting worker {identifier} from group {group_key}");
        if let Some(worker) = pool.detach_locked(&mut state, &identifier) {
            let _ = pool.executor.native_spawn(async move { worker.shutdown().await });
        }
    }

    check_invariants(&state);
}
