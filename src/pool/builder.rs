use super::{DEFAULT_THREAD_NAME, WorkerPool};
use crate::callable::InvokeOnce;
use crate::error::SpawnError;

use std::thread;

/// Builder for configuring and creating a [`WorkerPool`].
///
/// # Examples
///
/// ```rust,ignore
/// let pool = WorkerPoolBuilder::new()
///     .max_threads(8)
///     .prestart(true)
///     .thread_name("io-worker")
///     .build()?;
/// ```
pub struct WorkerPoolBuilder {
    /// Upper bound on worker threads; `None` for unbounded.
    max_threads: Option<usize>,

    /// Start every worker at build time instead of on demand.
    prestart: bool,

    /// Prefix of worker thread names.
    thread_name: String,
}

impl WorkerPoolBuilder {
    /// Creates a `WorkerPoolBuilder` with default configuration.
    ///
    /// By default the pool is bounded by the number of available logical
    /// CPUs, falling back to `1` if unavailable, and workers start lazily.
    pub fn new() -> Self {
        let max_threads = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            max_threads: Some(max_threads),
            prestart: false,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }

    /// Sets the maximum number of worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn max_threads(mut self, n: usize) -> Self {
        assert!(n > 0, "max_threads must be > 0");

        self.max_threads = Some(n);
        self
    }

    /// Removes the upper bound: `execute` never blocks and starts a new
    /// worker whenever none is idle.
    pub fn unbounded(mut self) -> Self {
        self.max_threads = None;
        self
    }

    /// Starts every worker when the pool is built.
    ///
    /// Has no effect on an unbounded pool.
    pub fn prestart(mut self, prestart: bool) -> Self {
        self.prestart = prestart;
        self
    }

    /// Sets the worker thread name prefix.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Builds the pool.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError`] if a prestarted worker cannot be spawned.
    /// Workers already started are joined before returning.
    pub fn build(self) -> Result<WorkerPool, SpawnError> {
        self.build_with_storage()
    }

    /// Builds a pool storing its jobs as `J`.
    ///
    /// # Errors
    ///
    /// Same as [`build`](Self::build).
    pub fn build_with_storage<J: InvokeOnce>(self) -> Result<WorkerPool<J>, SpawnError> {
        let pool = WorkerPool::with_config(self.max_threads, self.thread_name);

        if self.prestart {
            pool.prestart()?;
        }

        Ok(pool)
    }
}

impl Default for WorkerPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}
