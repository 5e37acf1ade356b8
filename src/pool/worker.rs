use super::core::Shared;
use crate::callable::InvokeOnce;

use log::debug;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Per-thread execution context.
///
/// `job` holds the callable handed over by `execute` until the thread
/// picks it up; `ready` wakes the thread when it is set or when the pool
/// stops.
pub(crate) struct Slot<J> {
    pub(crate) job: Mutex<Option<J>>,
    pub(crate) ready: Condvar,
}

impl<J> Slot<J> {
    pub(crate) fn new() -> Self {
        Self {
            job: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Hands `job` to the slot's thread.
    ///
    /// The slot must have been taken off the free list first.
    pub(crate) fn assign(&self, job: J) {
        let mut pending = self.job.lock();
        debug_assert!(pending.is_none(), "slot handed a second job");

        *pending = Some(job);
        self.ready.notify_one();
    }

    /// Wakes the thread so it can observe the stopping flag.
    pub(crate) fn notify_stop(&self) {
        let _pending = self.job.lock();
        self.ready.notify_one();
    }
}

/// The thread side of a slot.
pub(crate) struct Worker<J> {
    /// Position of the slot in the pool, also its free-list entry.
    index: usize,
    slot: Arc<Slot<J>>,
    shared: Arc<Shared<J>>,
}

impl<J: InvokeOnce> Worker<J> {
    pub(crate) fn new(index: usize, slot: Arc<Slot<J>>, shared: Arc<Shared<J>>) -> Self {
        Self {
            index,
            slot,
            shared,
        }
    }

    /// Runs jobs until the pool stops.
    ///
    /// After each job the slot goes back on the free list. A job that
    /// panics unwinds the thread; its slot is then never released.
    pub(crate) fn run(self) {
        debug!("worker #{} started", self.index);

        while let Some(job) = self.next_job() {
            job.invoke_once();
            self.shared.release(self.index);
        }

        debug!("worker #{} exiting", self.index);
    }

    /// Waits for a job, or returns `None` once the pool is stopping.
    ///
    /// A job handed over before the stop is still returned.
    fn next_job(&self) -> Option<J> {
        let mut pending = self.slot.job.lock();

        loop {
            if let Some(job) = pending.take() {
                return Some(job);
            }

            if self.shared.stopping.load(Ordering::Acquire) {
                return None;
            }

            self.slot.ready.wait(&mut pending);
        }
    }
}
