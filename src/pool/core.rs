use super::worker::{Slot, Worker};
use crate::callable::{BoxedFnOnce, InvokeOnce};
use crate::error::SpawnError;

use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

/// Slots and the indices of the idle ones.
pub(crate) struct PoolState<J> {
    pub(crate) slots: Vec<Arc<Slot<J>>>,
    pub(crate) free: Vec<usize>,
}

/// State shared between the pool handle and its worker threads.
pub(crate) struct Shared<J> {
    pub(crate) state: Mutex<PoolState<J>>,

    /// Signalled whenever a slot returns to the free list.
    pub(crate) available: Condvar,

    /// Set when the pool is being dropped.
    pub(crate) stopping: AtomicBool,
}

impl<J> Shared<J> {
    /// Puts slot `index` back on the free list and wakes one submitter.
    pub(crate) fn release(&self, index: usize) {
        let mut state = self.state.lock();
        state.free.push(index);
        self.available.notify_one();
    }
}

/// A pool of dedicated worker threads.
///
/// Each worker runs at most one job at a time and goes back to the free
/// list when it is done. Threads are created on demand up to the maximum
/// (or up front with [`WorkerPoolBuilder::prestart`](super::WorkerPoolBuilder::prestart))
/// and live as long as the pool.
///
/// There is no ordering between jobs and no per-job timeout: a job that
/// never returns holds its slot forever.
///
/// Jobs are stored as `J`, a boxed closure unless another [`InvokeOnce`]
/// type is chosen with [`with_storage`](Self::with_storage).
///
/// Dropping the pool lets every worker finish its current or already
/// handed-off job, then joins all threads.
pub struct WorkerPool<J = BoxedFnOnce> {
    shared: Arc<Shared<J>>,

    /// Join handles, one per slot.
    handles: Mutex<Vec<JoinHandle<()>>>,

    /// `None` means the pool grows without bound.
    max_threads: Option<usize>,

    /// Thread name prefix; workers are named `{prefix}-{index}`.
    thread_name: String,
}

impl WorkerPool {
    /// Creates a pool that lazily grows up to `max_threads` workers.
    ///
    /// # Panics
    ///
    /// Panics if `max_threads == 0`.
    pub fn new(max_threads: usize) -> Self {
        Self::with_storage(max_threads)
    }

    /// Hands `job` to an idle worker.
    ///
    /// If every worker is busy and the pool is at its maximum, blocks until
    /// one frees up. Below the maximum a new worker is started instead.
    /// Returns once the job has been handed over, not once it has run.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError`] if a new worker thread cannot be started.
    pub fn execute<F>(&self, job: F) -> Result<(), SpawnError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Box::new(job))
    }
}

impl<J: InvokeOnce> WorkerPool<J> {
    /// Creates a pool storing its jobs as `J`, lazily growing up to
    /// `max_threads` workers.
    ///
    /// # Panics
    ///
    /// Panics if `max_threads == 0`.
    pub fn with_storage(max_threads: usize) -> Self {
        assert!(max_threads > 0, "max_threads must be > 0");

        Self::with_config(Some(max_threads), super::DEFAULT_THREAD_NAME.to_string())
    }

    pub(crate) fn with_config(max_threads: Option<usize>, thread_name: String) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState {
                    slots: Vec::new(),
                    free: Vec::new(),
                }),
                available: Condvar::new(),
                stopping: AtomicBool::new(false),
            }),
            handles: Mutex::new(Vec::new()),
            max_threads,
            thread_name,
        }
    }

    /// Starts every worker up to the maximum, leaving them idle.
    pub(crate) fn prestart(&self) -> Result<(), SpawnError> {
        let Some(max) = self.max_threads else {
            return Ok(());
        };

        let mut state = self.shared.state.lock();
        while state.slots.len() < max {
            let (index, _) = self.spawn_slot(&mut state)?;
            state.free.push(index);
        }

        Ok(())
    }

    /// Hands an already stored job to an idle worker; see
    /// [`WorkerPool::execute`].
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError`] if a new worker thread cannot be started.
    pub fn submit(&self, job: J) -> Result<(), SpawnError> {
        let slot = {
            let mut state = self.shared.state.lock();

            loop {
                if let Some(index) = state.free.pop() {
                    trace!("job handed to idle worker #{index}");
                    break state.slots[index].clone();
                }

                if self.has_room(state.slots.len()) {
                    let (index, slot) = self.spawn_slot(&mut state)?;
                    trace!("job handed to new worker #{index}");
                    break slot;
                }

                self.shared.available.wait(&mut state);
            }
        };

        slot.assign(job);

        Ok(())
    }

    /// Number of workers not on the free list.
    ///
    /// A snapshot: it may be stale as soon as it is returned.
    pub fn count_active(&self) -> usize {
        let state = self.shared.state.lock();
        state.slots.len() - state.free.len()
    }

    /// Number of workers created so far.
    pub fn size(&self) -> usize {
        self.shared.state.lock().slots.len()
    }

    /// Configured maximum, `None` for an unbounded pool.
    pub fn max_threads(&self) -> Option<usize> {
        self.max_threads
    }

    fn has_room(&self, size: usize) -> bool {
        self.max_threads.is_none_or(|max| size < max)
    }

    /// Creates slot `slots.len()` and starts its thread.
    ///
    /// The new slot is not put on the free list.
    fn spawn_slot(&self, state: &mut PoolState<J>) -> Result<(usize, Arc<Slot<J>>), SpawnError> {
        let index = state.slots.len();
        let slot = Arc::new(Slot::new());
        let worker = Worker::new(index, slot.clone(), self.shared.clone());

        let handle = thread::Builder::new()
            .name(format!("{}-{}", self.thread_name, index))
            .spawn(move || worker.run())
            .map_err(|source| SpawnError { index, source })?;

        state.slots.push(slot.clone());
        self.handles.lock().push(handle);

        debug!("spawned worker #{index}");

        Ok((index, slot))
    }
}

impl<J> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        self.shared.stopping.store(true, Ordering::Release);

        let slots = self.shared.state.lock().slots.clone();
        for slot in &slots {
            slot.notify_stop();
        }

        for handle in self.handles.get_mut().drain(..) {
            if handle.join().is_err() {
                warn!("worker thread terminated by a panicking job");
            }
        }

        debug!("worker pool shut down ({} workers)", slots.len());
    }
}
