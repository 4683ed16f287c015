//! Test doubles for the `Worker`/`SpawnEngine` traits the pool consumes.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use app_pool::{PoolOptions, Session, SpawnEngine, SpawnError, Worker};
use async_trait::async_trait;

pub struct MockSession;

impl Session for MockSession {}

#[derive(Debug)]
pub struct MockWorker {
    pid: u32,
    shutdowns: AtomicU32,
    fail_next_open: AtomicBool,
    always_fail_open: bool,
}

impl MockWorker {
    pub fn shutdown_count(&self) -> u32 {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// Makes the next (and only the next) `open_session` call fail, simulating a
    /// worker that crashed between being selected and being talked to.
    pub fn fail_next_open_session(&self) {
        self.fail_next_open.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Worker for MockWorker {
    async fn open_session(&self) -> Result<Box<dyn Session>, String> {
        if self.always_fail_open || self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err("mock worker crashed on open_session".to_string());
        }
        Ok(Box::new(MockSession))
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// A `SpawnEngine` whose failures are deterministic by call order rather than wall
/// clock, so a test can arrange for (say) the foreground spawn to succeed and every
/// later background spawn to fail without racing the background task.
pub struct MockSpawnEngine {
    calls: AtomicU32,
    next_pid: AtomicU32,
    fail_from_call: Option<u32>,
    /// When set, every worker this engine spawns crashes on every `open_session`
    /// call, rather than just the next one.
    always_crash_workers: bool,
    pub spawned: Mutex<Vec<Arc<MockWorker>>>,
}

impl MockSpawnEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(MockSpawnEngine {
            calls: AtomicU32::new(0),
            next_pid: AtomicU32::new(1),
            fail_from_call: None,
            always_crash_workers: false,
            spawned: Mutex::new(Vec::new()),
        })
    }

    /// Every call at index `n` or later (0-based) fails with `SpawnError`.
    pub fn failing_from_call(n: u32) -> Arc<Self> {
        Arc::new(MockSpawnEngine {
            calls: AtomicU32::new(0),
            next_pid: AtomicU32::new(1),
            fail_from_call: Some(n),
            always_crash_workers: false,
            spawned: Mutex::new(Vec::new()),
        })
    }

    /// Every spawned worker crashes on every `open_session` call, simulating an
    /// application that starts but never serves a single request.
    pub fn new_always_crashing() -> Arc<Self> {
        Arc::new(MockSpawnEngine {
            calls: AtomicU32::new(0),
            next_pid: AtomicU32::new(1),
            fail_from_call: None,
            always_crash_workers: true,
            spawned: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn workers(&self) -> Vec<Arc<MockWorker>> {
        self.spawned.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpawnEngine for MockSpawnEngine {
    async fn spawn(&self, _app_root: &str, _options: &PoolOptions) -> Result<Arc<dyn Worker>, SpawnError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(fail_from) = self.fail_from_call {
            if call >= fail_from {
                return Err(SpawnError(format!("mock spawn failure on call {call}")));
            }
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let worker = Arc::new(MockWorker {
            pid,
            shutdowns: AtomicU32::new(0),
            fail_next_open: AtomicBool::new(false),
            always_fail_open: self.always_crash_workers,
        });
        self.spawned.lock().unwrap().push(worker.clone());
        Ok(worker as Arc<dyn Worker>)
    }

    async fn backtraces(&self) -> Result<String, SpawnError> {
        let workers = self.spawned.lock().unwrap();
        Ok(workers.iter().map(|w| format!("pid {} (mock, no backtrace)", w.pid())).collect::<Vec<_>>().join("\n"))
    }

    async fn inspect(&self) -> Result<String, SpawnError> {
        Ok(format!("mock spawn engine: {} calls made", self.call_count()))
    }
}
