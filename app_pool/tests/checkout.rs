mod common;

use std::time::Duration;

use app_pool::{Pool, PoolConfig, PoolError, PoolOptions};
use task_executor::Executor;

use common::MockSpawnEngine;

fn config() -> PoolConfig {
    PoolConfig {
        max: 8,
        max_per_app: 8,
        max_idle_time: Duration::from_secs(0),
        max_attempts: 3,
    }
}

#[tokio::test]
async fn checkout_and_close_round_trip() {
    let spawn_engine = MockSpawnEngine::new();
    let pool = Pool::new(spawn_engine.clone(), Executor::new(), config());

    let session = pool
        .get("/apps/demo", &PoolOptions::new("demo"))
        .await
        .expect("checkout should succeed");
    session.session();
    session.close().await;

    let snapshot = pool.snapshot();
    assert_eq!(snapshot.active, 0);
    assert_eq!(snapshot.count, 1);
    assert_eq!(spawn_engine.call_count(), 1);
}

#[tokio::test]
async fn reuses_idle_worker_instead_of_spawning_a_second_one() {
    let spawn_engine = MockSpawnEngine::new();
    let pool = Pool::new(spawn_engine.clone(), Executor::new(), config());
    let options = PoolOptions::new("demo");

    let first = pool.get("/apps/demo", &options).await.unwrap();
    first.close().await;

    let second = pool.get("/apps/demo", &options).await.unwrap();
    second.close().await;

    assert_eq!(spawn_engine.call_count(), 1, "the idle worker should have been reused");
    assert_eq!(pool.snapshot().count, 1);
}

#[tokio::test]
async fn max_requests_retires_worker_after_limit() {
    let spawn_engine = MockSpawnEngine::new();
    let pool = Pool::new(spawn_engine.clone(), Executor::new(), config());
    let mut options = PoolOptions::new("demo");
    options.max_requests = 2;

    pool.get("/apps/demo", &options).await.unwrap().close().await;
    pool.get("/apps/demo", &options).await.unwrap().close().await;

    assert_eq!(spawn_engine.call_count(), 1);
    let workers = spawn_engine.workers();
    assert_eq!(workers[0].shutdown_count(), 1, "worker should retire after its 2nd session");
    assert!(pool.snapshot().groups.is_empty(), "the now-empty group should be torn down");

    pool.get("/apps/demo", &options).await.unwrap().close().await;
    assert_eq!(spawn_engine.call_count(), 2, "a fresh worker should be spawned for the next request");
}

#[tokio::test]
async fn idle_cleaner_evicts_past_max_idle_time_but_respects_min_processes() {
    let spawn_engine = MockSpawnEngine::new();
    let mut cfg = config();
    cfg.max_idle_time = Duration::from_millis(30);
    let pool = Pool::new(spawn_engine.clone(), Executor::new(), cfg);

    let mut pinned = PoolOptions::new("pinned");
    pinned.min_processes = 1;
    let mut floating = PoolOptions::new("floating");
    floating.min_processes = 0;

    pool.get("/apps/pinned", &pinned).await.unwrap().close().await;
    pool.get("/apps/floating", &floating).await.unwrap().close().await;
    assert_eq!(spawn_engine.call_count(), 2);

    // Real wall-clock wait: `last_used` is a `std::time::Instant`, not a mockable
    // tokio one, so there's no virtual clock to advance here.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let snapshot = pool.snapshot();
    assert_eq!(snapshot.groups.len(), 1, "only the floating group should survive");
    assert_eq!(snapshot.groups[0].name, "pinned");

    let workers = spawn_engine.workers();
    assert_eq!(workers[0].shutdown_count(), 0, "pinned worker sits at its min_processes floor");
    assert_eq!(workers[1].shutdown_count(), 1, "floating worker has nothing keeping it alive");
}

#[tokio::test]
async fn background_spawn_failure_detaches_group_and_surfaces_on_next_get() {
    // Call 0 (the foreground spawn) succeeds; every later call (the warm-up spawner
    // started because min_processes > 1) fails.
    let spawn_engine = MockSpawnEngine::failing_from_call(1);
    let pool = Pool::new(spawn_engine.clone(), Executor::new(), config());
    let mut options = PoolOptions::new("demo");
    options.min_processes = 2;

    let session = pool.get("/apps/demo", &options).await.expect("foreground spawn succeeds");
    session.close().await;

    // Give the background spawner task room to fail and tear the group down.
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(pool.snapshot().groups.is_empty(), "background spawn failure should detach the whole group");

    let retry = pool.get("/apps/demo", &options).await;
    assert!(matches!(retry, Err(PoolError::Spawn(_))), "the failure should surface on the next checkout");
}

#[tokio::test]
async fn concurrent_get_blocks_on_capacity_then_evicts_the_closed_worker() {
    let spawn_engine = MockSpawnEngine::new();
    let mut cfg = config();
    cfg.max = 2;
    cfg.max_per_app = 2;
    let pool = Pool::new(spawn_engine.clone(), Executor::new(), cfg);
    let opts_a = PoolOptions::new("a");

    let a1 = pool.get("/apps/a", &opts_a).await.unwrap();
    let a2 = pool.get("/apps/a", &opts_a).await.unwrap();
    assert_eq!(pool.snapshot().active, 2);
    assert_eq!(spawn_engine.call_count(), 2);

    let opts_b = PoolOptions::new("b");
    let mut waiter1 = {
        let pool = pool.clone();
        let opts_b = opts_b.clone();
        tokio::spawn(async move { pool.get("/apps/b", &opts_b).await })
    };
    let mut waiter2 = {
        let pool = pool.clone();
        let opts_b = opts_b.clone();
        tokio::spawn(async move { pool.get("/apps/b", &opts_b).await })
    };

    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert!(
        !waiter1.is_finished() && !waiter2.is_finished(),
        "neither b-request has capacity yet, both should block on cv_new_group"
    );

    // Closing one of the two active "a" sessions frees exactly one slot: exactly one
    // waiter should wake, evict the freshly-closed "a" worker, and spawn "b".
    a1.close().await;

    let winner = tokio::select! {
        res = &mut waiter1 => res.unwrap().unwrap(),
        res = &mut waiter2 => res.unwrap().unwrap(),
    };

    assert_eq!(spawn_engine.call_count(), 3, "exactly one waiter should have spawned group b");

    // Eviction shuts the victim down in the background; give that fire-and-forget
    // task a chance to run before inspecting it.
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert_eq!(
        spawn_engine.workers()[0].shutdown_count(),
        1,
        "the freshly closed a-worker is the one evicted, not a2"
    );
    assert_eq!(spawn_engine.workers()[1].shutdown_count(), 0, "a2 is still checked out, untouched");

    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert!(
        !waiter1.is_finished() || !waiter2.is_finished(),
        "the second b-request must still be blocked: the pool is at capacity again"
    );

    winner.close().await;
    a2.close().await;

    let remaining = if waiter1.is_finished() { waiter2 } else { waiter1 };
    let second = tokio::time::timeout(Duration::from_secs(1), remaining)
        .await
        .expect("the second b-request should wake once another a-session closes")
        .unwrap()
        .unwrap();
    second.close().await;
}

#[tokio::test]
async fn global_queue_waiter_wakes_and_reuses_the_newly_idle_worker() {
    let spawn_engine = MockSpawnEngine::new();
    let mut cfg = config();
    cfg.max = 1;
    cfg.max_per_app = 1;
    let pool = Pool::new(spawn_engine.clone(), Executor::new(), cfg);
    let mut options = PoolOptions::new("a");
    options.use_global_queue = true;

    let first = pool.get("/apps/a", &options).await.unwrap();
    assert_eq!(spawn_engine.call_count(), 1);

    let waiter = {
        let pool = pool.clone();
        let options = options.clone();
        tokio::spawn(async move { pool.get("/apps/a", &options).await })
    };

    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert!(!waiter.is_finished(), "the second get should block on the global queue, not spawn a second worker");
    assert_eq!(pool.snapshot().waiting_on_global_queue, 1);

    first.close().await;

    let second = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("closing the sole worker's session should wake the global-queue waiter")
        .unwrap()
        .unwrap();

    assert_eq!(
        spawn_engine.call_count(),
        1,
        "the waiter should rescan and reuse the now-idle worker rather than spawning a second one"
    );
    assert_eq!(pool.snapshot().waiting_on_global_queue, 0);
    second.close().await;
}

#[tokio::test]
async fn crash_on_session_open_detaches_the_worker_and_retries_on_a_fresh_one() {
    let spawn_engine = MockSpawnEngine::new();
    let pool = Pool::new(spawn_engine.clone(), Executor::new(), config());
    let options = PoolOptions::new("demo");

    let first = pool.get("/apps/demo", &options).await.unwrap();
    first.close().await;
    assert_eq!(spawn_engine.call_count(), 1);

    // Arrange for the now-idle worker to crash the instant it's handed a session.
    spawn_engine.workers()[0].fail_next_open_session();

    let retried = pool
        .get("/apps/demo", &options)
        .await
        .expect("the crash should be retried transparently on a freshly spawned worker");
    retried.close().await;

    assert_eq!(spawn_engine.call_count(), 2, "the crashed worker's group should be rebuilt from scratch");

    // The crashed worker's shutdown is fired off in the background; give it a
    // chance to run before inspecting it.
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    let workers = spawn_engine.workers();
    assert_eq!(workers[0].shutdown_count(), 1, "the crashed worker should have been shut down");
    assert_eq!(workers[1].shutdown_count(), 0, "the replacement worker is healthy and still around");
}

#[tokio::test]
async fn exhausting_max_attempts_surfaces_the_crash() {
    let spawn_engine = MockSpawnEngine::new_always_crashing();
    let mut cfg = config();
    cfg.max_attempts = 3;
    let pool = Pool::new(spawn_engine.clone(), Executor::new(), cfg);
    let options = PoolOptions::new("demo");

    let result = pool.get("/apps/demo", &options).await;

    assert!(
        matches!(result, Err(PoolError::SessionOpen(_))),
        "every attempt crashes, so the final attempt's error should surface"
    );
    assert_eq!(spawn_engine.call_count(), 3, "exactly max_attempts workers should have been tried");

    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    for worker in spawn_engine.workers() {
        assert_eq!(worker.shutdown_count(), 1, "every crashed worker should still be shut down");
    }
    assert!(pool.snapshot().groups.is_empty(), "no group should survive a fully exhausted retry loop");
}
