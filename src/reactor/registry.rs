use super::poller::common::Interest;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::Arc;

/// A readiness callback shared between the table and the driver thread.
///
/// The driver clones the `Arc` out of the table and drops the table lock
/// before invoking it.
pub(crate) type Handler<C> = Arc<Mutex<C>>;

/// Everything registered for one descriptor.
pub(crate) struct Registration<C> {
    /// Kernel token of this registration.
    ///
    /// Fresh for every registration, so events queued for a closed
    /// descriptor never reach a later registration that reuses its number.
    pub(crate) token: u64,

    pub(crate) read: Option<Handler<C>>,
    pub(crate) write: Option<Handler<C>>,

    /// Whether the one-shot write notification is currently requested.
    pub(crate) write_armed: bool,
}

impl<C> Registration<C> {
    pub(crate) fn new(token: u64) -> Self {
        Self {
            token,
            read: None,
            write: None,
            write_armed: false,
        }
    }

    /// Interests that currently have a callback.
    pub(crate) fn interest(&self) -> Interest {
        Interest {
            read: self.read.is_some(),
            write: self.write.is_some(),
        }
    }

    /// Interest the kernel must currently report.
    ///
    /// Empty means the descriptor is not in the epoll set at all.
    pub(crate) fn active(&self) -> Interest {
        Interest {
            read: self.read.is_some(),
            write: self.write.is_some() && self.write_armed,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.interest().is_empty()
    }

    /// Returns `true` if any of `interest` already has a callback.
    pub(crate) fn overlaps(&self, interest: Interest) -> bool {
        (interest.read && self.read.is_some()) || (interest.write && self.write.is_some())
    }
}

impl<C> Clone for Registration<C> {
    fn clone(&self) -> Self {
        Self {
            token: self.token,
            read: self.read.clone(),
            write: self.write.clone(),
            write_armed: self.write_armed,
        }
    }
}

/// The registration table: entries by descriptor, plus a token index used
/// to route kernel events.
pub(crate) struct Registry<C> {
    entries: HashMap<RawFd, Registration<C>>,
    tokens: HashMap<u64, RawFd>,
    next_token: u64,
}

impl<C> Registry<C> {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
            tokens: HashMap::new(),
            next_token: 0,
        }
    }

    pub(crate) fn get(&self, fd: RawFd) -> Option<&Registration<C>> {
        self.entries.get(&fd)
    }

    pub(crate) fn get_mut(&mut self, fd: RawFd) -> Option<&mut Registration<C>> {
        self.entries.get_mut(&fd)
    }

    /// Returns the registration `fd` has, or a fresh empty one with a new
    /// token. The table is left unchanged.
    pub(crate) fn current_or_fresh(&mut self, fd: RawFd) -> Registration<C> {
        if let Some(registration) = self.entries.get(&fd) {
            return registration.clone();
        }

        let token = self.next_token;
        self.next_token += 1;

        Registration::new(token)
    }

    /// Finds the registration an event token belongs to.
    ///
    /// `None` when the registration it was issued for is gone.
    pub(crate) fn resolve(&mut self, token: u64) -> Option<(RawFd, &mut Registration<C>)> {
        let fd = *self.tokens.get(&token)?;
        let registration = self.entries.get_mut(&fd)?;

        debug_assert_eq!(registration.token, token);

        Some((fd, registration))
    }

    pub(crate) fn insert(&mut self, fd: RawFd, registration: Registration<C>) {
        self.tokens.insert(registration.token, fd);

        if let Some(previous) = self.entries.insert(fd, registration)
            && self.tokens.get(&previous.token) != Some(&fd)
        {
            self.tokens.remove(&previous.token);
        }
    }

    pub(crate) fn remove(&mut self, fd: RawFd) -> Option<Registration<C>> {
        let registration = self.entries.remove(&fd)?;
        self.tokens.remove(&registration.token);

        Some(registration)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
