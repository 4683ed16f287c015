// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
#![allow(clippy::match_ref_pats)]
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
#![allow(clippy::mutex_atomic)]

use std::env;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinError;

///
/// Executors come in two flavors:
/// * "borrowed"
///     * Created with `Self::new()`, or `self::to_borrowed()`.
///     * A borrowed Executor will not be shut down when all handles are dropped, and shutdown
///       methods will have no impact.
///     * Used when multiple runs of the pool will borrow a single Executor owned by an embedder,
///       and in unit tests where the Runtime is created by macros.
/// * "owned"
///     * Created with `Self::new_owned()`.
///     * When all handles of an owned Executor are dropped, its Runtime will be shut down.
///       Additionally, the explicit shutdown methods can be used to shut down the Executor for all
///       clones.
///
#[derive(Debug, Clone)]
pub struct Executor {
    runtime: Arc<Mutex<Option<Runtime>>>,
    handle: Handle,
}

impl Executor {
    ///
    /// Creates an Executor for an existing tokio::Runtime (generally provided by tokio's macros).
    ///
    /// The returned Executor will have a lifecycle independent of the Runtime, meaning that dropping
    /// all clones of the Executor will not cause the Runtime to be shut down. Likewise, the owner of
    /// the Runtime must ensure that it is kept alive longer than all Executor instances, because
    /// existence of a Handle does not prevent a Runtime from shutting down. This is guaranteed by
    /// the scope of the tokio::{test, main} macros.
    ///
    pub fn new() -> Executor {
        Self {
            runtime: Arc::new(Mutex::new(None)),
            handle: Handle::current(),
        }
    }

    ///
    /// Creates an owned Executor backed by a fresh multi-threaded tokio::Runtime, shut down when
    /// the last clone is dropped or `shutdown` is called.
    ///
    pub fn new_owned(num_worker_threads: usize, max_threads: usize) -> Result<Executor, String> {
        let mut runtime_builder = Builder::new_multi_thread();

        runtime_builder
            .worker_threads(num_worker_threads)
            .max_blocking_threads(max_threads.saturating_sub(num_worker_threads).max(1))
            .enable_all();

        let runtime = runtime_builder
            .build()
            .map_err(|e| format!("Failed to start the runtime: {e}"))?;

        let handle = runtime.handle().clone();
        Ok(Executor {
            runtime: Arc::new(Mutex::new(Some(runtime))),
            handle,
        })
    }

    ///
    /// Creates a clone of this Executor which is disconnected from shutdown events. See the `Executor`
    /// rustdoc.
    ///
    pub fn to_borrowed(&self) -> Executor {
        Self {
            runtime: Arc::new(Mutex::new(None)),
            handle: self.handle.clone(),
        }
    }

    ///
    /// Enter the runtime context associated with this Executor. This should be used in situations
    /// where threads not started by the runtime need access to it via task-local variables.
    ///
    pub fn enter<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _context = self.handle.enter();
        f()
    }

    ///
    /// Run a Future on a tokio Runtime as a new Task, and return a Future handle to it.
    ///
    /// If the background Task exits abnormally, the given closure will be called to recover: usually
    /// it should convert the resulting Error to a relevant error type.
    ///
    /// If the returned Future is dropped, the computation will still continue to completion: see
    /// <https://docs.rs/tokio/1/tokio/task/struct.JoinHandle.html>
    ///
    pub fn spawn<O: Send + 'static, F: Future<Output = O> + Send + 'static>(
        &self,
        future: F,
        rescue_join_error: impl FnOnce(JoinError) -> O,
    ) -> impl Future<Output = O> {
        self.handle.spawn(future).map(|res| match res {
            Ok(o) => o,
            Err(e) => rescue_join_error(e),
        })
    }

    ///
    /// Run a Future on a tokio Runtime as a new Task, and return a JoinHandle.
    ///
    pub fn native_spawn<O: Send + 'static, F: Future<Output = O> + Send + 'static>(
        &self,
        future: F,
    ) -> tokio::task::JoinHandle<O> {
        self.handle.spawn(future)
    }

    ///
    /// Spawn a closure on a threadpool reserved for blocking work, and return a Future handle to it.
    ///
    pub fn spawn_blocking<F: FnOnce() -> R + Send + 'static, R: Send + 'static>(
        &self,
        f: F,
        rescue_join_error: impl FnOnce(JoinError) -> R,
    ) -> impl Future<Output = R> {
        self.handle.spawn_blocking(f).map(|res| match res {
            Ok(o) => o,
            Err(e) => rescue_join_error(e),
        })
    }

    /// Return a reference to this executor's runtime handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    ///
    /// A blocking call to shut down the Runtime associated with this "owned" Executor. If tasks do
    /// not shut down within the given timeout, they are leaked.
    ///
    /// This method has no effect for "borrowed" Executors: see the `Executor` rustdoc.
    ///
    pub fn shutdown(&self, timeout: Duration) {
        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };

        let start = Instant::now();
        runtime.shutdown_timeout(timeout + Duration::from_millis(250));
        if start.elapsed() > timeout {
            log::warn!("Executor shutdown took unexpectedly long: tasks were likely leaked!");
        }
    }

    /// Returns true if `shutdown` has been called for this Executor. Always returns true for
    /// borrowed Executors.
    pub fn is_shutdown(&self) -> bool {
        self.runtime.lock().is_none()
    }
}

/// Number of logical CPUs available, used as a fallback default for pool sizing decisions.
pub fn num_cpus() -> usize {
    env::var("TASK_EXECUTOR_NUM_CPUS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| std::thread::available_parallelism().map_or(4, |n| n.get()))
}

#[cfg(test)]
mod tests {
    use super::Executor;

    #[tokio::test]
    async fn spawn_runs_on_the_shared_runtime() {
        let executor = Executor::new();
        let result = executor
            .spawn(async { 1 + 1 }, |_| panic!("task panicked"))
            .await;
        assert_eq!(result, 2);
    }

    #[tokio::test]
    async fn to_borrowed_is_independent_of_shutdown() {
        let executor = Executor::new();
        let borrowed = executor.to_borrowed();
        assert!(!borrowed.is_shutdown());
        borrowed.shutdown(std::time::Duration::from_millis(10));
        assert!(!borrowed.is_shutdown());
    }
}
