use super::entry::{TimerId, Timers};
use crate::callable::{BoxedFnOnce, InvokeOnce};

use log::{debug, trace};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Stand-in deadline for delays too large to represent.
fn far_future() -> Instant {
    // Roughly 30 years.
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}

/// Deferred callback scheduler.
///
/// Callbacks are kept ordered by deadline (monotonic clock) and fired by
/// whichever thread calls [`run`](Self::run). Other threads schedule and
/// cancel concurrently; the driver sleeps on a condition variable until the
/// next deadline or until it is notified.
///
/// Firing and cancelling are decided under the same lock: whichever gets
/// there first wins and the other observes the entry gone.
///
/// Callbacks run on the driver thread with no lock held, so they may
/// schedule, cancel or stop. A slow callback delays every later one.
///
/// Callbacks are stored as `J`, a boxed closure unless another
/// [`InvokeOnce`] type is chosen with [`with_storage`](Self::with_storage).
pub struct Scheduler<J = BoxedFnOnce> {
    timers: Mutex<Timers<J>>,

    /// Wakes the driver on schedule, cancel and stop.
    notify: Condvar,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_storage()
    }

    /// Schedules `callback` to run `delay` from now.
    ///
    /// Never blocks on the driver. Returns the id to pass to
    /// [`cancel`](Self::cancel).
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_callback(delay, Box::new(callback))
    }

    /// Schedules `callback` to run at `deadline`.
    ///
    /// A deadline in the past fires on the driver's next pass.
    pub fn schedule_at<F>(&self, deadline: Instant, callback: F) -> TimerId
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_callback_at(deadline, Box::new(callback))
    }
}

impl<J: InvokeOnce> Scheduler<J> {
    /// Creates a scheduler storing its callbacks as `J`.
    pub fn with_storage() -> Self {
        Self {
            timers: Mutex::new(Timers::new()),
            notify: Condvar::new(),
        }
    }

    /// [`Scheduler::schedule`] for an already stored callback.
    pub fn schedule_callback(&self, delay: Duration, callback: J) -> TimerId {
        let deadline = Instant::now()
            .checked_add(delay)
            .unwrap_or_else(far_future);

        self.schedule_callback_at(deadline, callback)
    }

    /// [`Scheduler::schedule_at`] for an already stored callback.
    pub fn schedule_callback_at(&self, deadline: Instant, callback: J) -> TimerId {
        let id = self.timers.lock().insert(deadline, callback);

        self.notify.notify_one();
        trace!("scheduled {id}");

        id
    }

    /// Cancels a pending callback.
    ///
    /// Returns `false` if `id` already fired, was already cancelled, or was
    /// never issued by this scheduler.
    pub fn cancel(&self, id: TimerId) -> bool {
        let removed = self.timers.lock().remove(id);

        match removed {
            Some(_callback) => {
                self.notify.notify_one();
                trace!("cancelled {id}");
                true
            }
            None => false,
        }
    }

    /// Fires callbacks as their deadlines pass, until [`stop`](Self::stop).
    ///
    /// Due callbacks run one at a time in deadline order, equal deadlines in
    /// schedule order. A panicking callback unwinds out of `run`, leaving
    /// the remaining entries pending.
    pub fn run(&self) {
        let mut timers = self.timers.lock();

        debug!("scheduler running");

        while !timers.stopped {
            if let Some((id, callback)) = timers.pop_due(Instant::now()) {
                trace!("firing {id}");
                MutexGuard::unlocked(&mut timers, || callback.invoke_once());
                continue;
            }

            match timers.next_deadline() {
                Some(deadline) => {
                    self.notify.wait_until(&mut timers, deadline);
                }
                None => self.notify.wait(&mut timers),
            }
        }

        debug!("scheduler stopped ({} pending)", timers.len());
    }

    /// Stops the driver loop.
    ///
    /// Idempotent and callable from any thread, including a callback.
    /// Stopping is final: a later `run` returns at once.
    pub fn stop(&self) {
        self.timers.lock().stopped = true;
        self.notify.notify_all();
    }

    /// Returns `true` once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.timers.lock().stopped
    }

    /// Number of callbacks still waiting to fire.
    pub fn pending(&self) -> usize {
        self.timers.lock().len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
