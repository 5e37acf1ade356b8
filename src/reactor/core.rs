use super::event::{Event, Events};
use super::poller::Poller;
use super::poller::common::Interest;
use super::registry::{Handler, Registry};
use crate::callable::{BoxedFn, Invoke};
use crate::error::ReactorInitError;

use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A callback queued through [`Reactor::wake_up`].
pub type WakeupFn = Box<dyn FnOnce() + Send>;

/// Default number of events collected per `epoll_wait`.
pub(crate) const DEFAULT_EVENT_CAPACITY: usize = 64;

/// The readiness reactor.
///
/// The reactor owns an `epoll` instance and a table mapping descriptors to
/// read-ready and write-ready callbacks. One thread drives [`run`](Self::run);
/// every other operation may be called from any thread, including from
/// inside a callback.
///
/// The reactor is responsible for:
/// - keeping the kernel interest set in sync with the registration table,
/// - dispatching ready callbacks on the driver thread,
/// - running callbacks handed over with [`wake_up`](Self::wake_up).
///
/// Callbacks are stored as `C`, a boxed closure unless another
/// [`Invoke`] type is chosen with [`with_storage`](Self::with_storage):
///
/// ```no_run
/// use treadle::{BoundedFn, Interest, Reactor};
///
/// let reactor = Reactor::<BoundedFn>::with_storage()?;
/// reactor.add_callback(0, Interest::READ, BoundedFn::new(|| println!("stdin")));
/// # Ok::<(), treadle::ReactorInitError>(())
/// ```
///
/// Share it with `Arc<Reactor>`. Dropping it closes the epoll instance and
/// the wakeup descriptor, never the registered descriptors.
pub struct Reactor<C = BoxedFn> {
    /// Kernel readiness facility plus the wakeup eventfd.
    poller: Poller,

    /// Registrations keyed by descriptor and by kernel token.
    registry: Mutex<Registry<C>>,

    /// Callbacks to run on the driver thread after the next wait.
    wakeups: Mutex<Vec<WakeupFn>>,

    /// Event buffers, only ever locked by the driver thread.
    events: Mutex<Events>,

    /// Set once by [`stop`](Self::stop).
    stopped: AtomicBool,
}

impl Reactor {
    /// Creates a reactor with the default event capacity.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorInitError`] if the epoll instance or the wakeup
    /// eventfd cannot be created.
    pub fn new() -> Result<Self, ReactorInitError> {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Registers `callback` for the readiness named by `interest`.
    ///
    /// Read interest is level-triggered: the callback runs on every loop
    /// iteration while the descriptor stays readable. Write interest is
    /// one-shot: registering it arms a single notification, and
    /// [`request_write`](Self::request_write) arms the next one.
    ///
    /// With [`Interest::BOTH`] the same callback serves both.
    ///
    /// Returns `false`, leaving everything untouched, if `interest` is
    /// empty, if `fd` already has a callback for one of the requested
    /// interests, or if the kernel rejects the registration.
    pub fn add<F>(&self, fd: RawFd, interest: Interest, callback: F) -> bool
    where
        F: FnMut() + Send + 'static,
    {
        self.add_callback(fd, interest, Box::new(callback))
    }
}

impl<C: Invoke> Reactor<C> {
    /// Creates a reactor storing its callbacks as `C`.
    ///
    /// # Errors
    ///
    /// Same as [`Reactor::new`].
    pub fn with_storage() -> Result<Self, ReactorInitError> {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub(crate) fn with_capacity(event_capacity: usize) -> Result<Self, ReactorInitError> {
        let poller = Poller::new()?;

        debug!("reactor created (event capacity {event_capacity})");

        Ok(Self {
            poller,
            registry: Mutex::new(Registry::new()),
            wakeups: Mutex::new(Vec::new()),
            events: Mutex::new(Events::with_capacity(event_capacity)),
            stopped: AtomicBool::new(false),
        })
    }

    /// Registers an already stored callback; see [`Reactor::add`].
    pub fn add_callback(&self, fd: RawFd, interest: Interest, callback: C) -> bool {
        if interest.is_empty() {
            return false;
        }

        let mut table = self.registry.lock();

        let current = table.current_or_fresh(fd);
        if current.overlaps(interest) {
            trace!("fd {fd}: {interest:?} already registered");
            return false;
        }

        let handler: Handler<C> = Arc::new(Mutex::new(callback));
        let mut next = current.clone();

        if interest.read {
            next.read = Some(handler.clone());
        }
        if interest.write {
            next.write = Some(handler);
            next.write_armed = true;
        }

        if let Err(err) = self.sync(fd, next.token, current.active(), next.active()) {
            warn!("fd {fd}: registration failed: {err}");
            return false;
        }

        table.insert(fd, next);
        trace!("fd {fd}: registered {interest:?}");

        true
    }

    /// Unregisters the callbacks named by `interest`.
    ///
    /// Once this returns the callbacks are never dispatched again; one the
    /// driver thread has already picked up is allowed to finish.
    ///
    /// Returns `false` if none of the requested interests is registered or
    /// if the kernel rejects the update.
    pub fn remove(&self, fd: RawFd, interest: Interest) -> bool {
        let mut table = self.registry.lock();

        let Some(current) = table.get(fd) else {
            return false;
        };

        if !current.overlaps(interest) {
            return false;
        }

        let mut next = current.clone();
        if interest.read {
            next.read = None;
        }
        if interest.write {
            next.write = None;
            next.write_armed = false;
        }

        match self.sync(fd, next.token, current.active(), next.active()) {
            Ok(()) => {}
            // The descriptor was closed behind our back; the kernel already
            // forgot it.
            Err(err) if next.active().is_empty() && is_gone(&err) => {
                trace!("fd {fd}: already gone from epoll");
            }
            Err(err) => {
                warn!("fd {fd}: deregistration failed: {err}");
                return false;
            }
        }

        if next.is_empty() {
            table.remove(fd);
        } else {
            table.insert(fd, next);
        }
        trace!("fd {fd}: unregistered {interest:?}");

        true
    }

    /// Arms the next one-shot write-ready notification for `fd`.
    ///
    /// Must be called again after every write callback if more writes are
    /// wanted. Arming an already armed descriptor is a no-op that succeeds.
    ///
    /// Returns `false` if `fd` has no write callback or the kernel rejects
    /// the update.
    pub fn request_write(&self, fd: RawFd) -> bool {
        let mut table = self.registry.lock();

        let Some(registration) = table.get_mut(fd) else {
            return false;
        };

        if registration.write.is_none() {
            return false;
        }

        if registration.write_armed {
            return true;
        }

        let before = registration.active();
        registration.write_armed = true;

        if let Err(err) = self.sync(fd, registration.token, before, registration.active()) {
            warn!("fd {fd}: write re-arm failed: {err}");
            registration.write_armed = false;
            return false;
        }

        true
    }

    /// Runs the event loop on the calling thread until [`stop`](Self::stop).
    ///
    /// Each iteration blocks in `epoll_wait`, then:
    /// 1. runs every callback queued with [`wake_up`](Self::wake_up),
    /// 2. invokes the callback of every ready registration.
    ///
    /// Callbacks run with no reactor lock held. A panicking callback unwinds
    /// out of `run`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if `epoll_wait` fails for a reason other than
    /// an interrupting signal.
    pub fn run(&self) -> io::Result<()> {
        let mut events = self.events.lock();

        debug!("reactor running");

        while !self.stopped.load(Ordering::Acquire) {
            self.poller.poll(&mut events, None)?;

            if events.woken {
                self.run_wakeups();
            }

            for event in events.iter() {
                self.dispatch(event);
            }
        }

        debug!("reactor stopped");

        Ok(())
    }

    /// Stops the event loop.
    ///
    /// The driver returns after finishing the callback it is currently
    /// running, if any. Idempotent and callable from any thread, including
    /// from a callback. Stopping is final: a later `run` returns at once.
    ///
    /// Wakeup callbacks that have not started yet are dropped without
    /// running, and so is every callback passed to a later
    /// [`wake_up`](Self::wake_up).
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            debug!("reactor stop requested");
        }

        let discarded = mem::take(&mut *self.wakeups.lock());
        if !discarded.is_empty() {
            debug!("dropping {} wakeup callback(s) on stop", discarded.len());
        }

        self.wake();
    }

    /// Returns `true` once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Forces the blocked wait to return.
    ///
    /// If `callback` is given it runs exactly once on the driver thread
    /// after that wait returns. This is how work from other threads is moved
    /// onto the driver thread without polling.
    ///
    /// Once the reactor is stopped the callback is dropped instead.
    pub fn wake_up(&self, callback: Option<WakeupFn>) {
        if let Some(callback) = callback {
            let mut wakeups = self.wakeups.lock();

            if self.stopped.load(Ordering::Acquire) {
                drop(wakeups);
                trace!("reactor stopped, dropping wakeup callback");
                return;
            }

            wakeups.push(callback);
        }

        self.wake();
    }

    /// Number of descriptors with at least one registered callback.
    pub fn registered(&self) -> usize {
        self.registry.lock().len()
    }

    fn wake(&self) {
        if let Err(err) = self.poller.waker().wake() {
            warn!("reactor wakeup failed: {err}");
        }
    }

    fn run_wakeups(&self) {
        let pending = mem::take(&mut *self.wakeups.lock());

        if !pending.is_empty() {
            trace!("running {} wakeup callback(s)", pending.len());
        }

        for callback in pending {
            if self.is_stopped() {
                break;
            }
            callback();
        }
    }

    /// Invokes the callbacks of the registration `event` was issued for.
    ///
    /// An event whose registration has been removed, even if its descriptor
    /// number was registered again since, is ignored.
    fn dispatch(&self, event: &Event) {
        if event.readable {
            let handler = self
                .registry
                .lock()
                .resolve(event.token)
                .and_then(|(_, registration)| registration.read.clone());

            if let Some(handler) = handler {
                handler.lock().invoke();
            }
        }

        if event.writable && let Some(handler) = self.take_write(event.token) {
            handler.lock().invoke();
        }
    }

    /// Disarms the one-shot write notification and returns its callback.
    fn take_write(&self, token: u64) -> Option<Handler<C>> {
        let mut table = self.registry.lock();
        let (fd, registration) = table.resolve(token)?;

        if !registration.write_armed {
            return None;
        }

        let handler = registration.write.clone()?;

        let before = registration.active();
        registration.write_armed = false;

        if let Err(err) = self.sync(fd, token, before, registration.active()) {
            warn!("fd {fd}: write disarm failed: {err}");
        }

        Some(handler)
    }

    /// Moves the kernel interest set of `fd` from `before` to `after`.
    ///
    /// A descriptor with no active interest is kept out of the epoll set so
    /// hang-ups on it cannot spin the loop.
    fn sync(&self, fd: RawFd, token: u64, before: Interest, after: Interest) -> io::Result<()> {
        match (before.is_empty(), after.is_empty()) {
            (true, true) => Ok(()),
            (true, false) => self.poller.register(fd, token, after),
            (false, true) => self.poller.deregister(fd),
            (false, false) if before == after => Ok(()),
            (false, false) => self.poller.reregister(fd, token, after),
        }
    }
}

fn is_gone(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::ENOENT) | Some(libc::EBADF))
}
