//! Linux `epoll` backend.
//!
//! Responsibilities:
//! - Add, modify and delete descriptor interest masks
//! - Block in `epoll_wait` until something is ready
//! - Own the `eventfd` used to interrupt that wait from other threads
//!
//! All control operations take `&self`; `epoll` itself is safe to drive
//! from several threads while another one is blocked in `epoll_wait`.

use super::common::{Interest, Waker};
use crate::error::ReactorInitError;
use crate::reactor::event::{Event, Events};

use libc::{
    EFD_CLOEXEC, EFD_NONBLOCK, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD,
    EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLRDHUP, epoll_create1, epoll_ctl, epoll_event,
    epoll_wait, eventfd,
};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Reserved token for the wakeup `eventfd`.
///
/// Registration tokens count up from zero, so `u64::MAX` is never handed
/// out to a descriptor.
const WAKE_TOKEN: u64 = u64::MAX;

const READ_FLAGS: u32 = (EPOLLIN | EPOLLRDHUP | EPOLLHUP | EPOLLERR) as u32;
const WRITE_FLAGS: u32 = (EPOLLOUT | EPOLLHUP | EPOLLERR) as u32;

/// Linux `epoll` poller.
///
/// Owns the epoll instance and the wakeup `eventfd`, which is registered
/// before anything else.
pub(crate) struct EpollPoller {
    epoll: OwnedFd,
    waker: Waker,
}

impl EpollPoller {
    /// Creates the epoll instance and registers the wakeup source.
    pub(crate) fn new() -> Result<Self, ReactorInitError> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(ReactorInitError::Poller(io::Error::last_os_error()));
        }
        let epoll = unsafe { OwnedFd::from_raw_fd(epoll) };

        let wake_fd = unsafe { eventfd(0, EFD_NONBLOCK | EFD_CLOEXEC) };
        if wake_fd < 0 {
            return Err(ReactorInitError::WakeupSource(io::Error::last_os_error()));
        }
        let wake_fd = unsafe { OwnedFd::from_raw_fd(wake_fd) };

        let mut event = epoll_event {
            events: EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };

        let rc = unsafe {
            epoll_ctl(
                epoll.as_raw_fd(),
                EPOLL_CTL_ADD,
                wake_fd.as_raw_fd(),
                &mut event,
            )
        };
        if rc < 0 {
            return Err(ReactorInitError::WakeupRegistration(
                io::Error::last_os_error(),
            ));
        }

        Ok(Self {
            epoll,
            waker: Waker(wake_fd),
        })
    }

    pub(crate) fn waker(&self) -> &Waker {
        &self.waker
    }

    /// Adds `fd` to the epoll set; its events carry `token`.
    pub(crate) fn register(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.control(EPOLL_CTL_ADD, fd, token, interest)
    }

    /// Replaces the interest mask of an already added `fd`.
    pub(crate) fn reregister(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.control(EPOLL_CTL_MOD, fd, token, interest)
    }

    /// Removes `fd` from the epoll set.
    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        // Kernels before 2.6.9 reject a null event pointer for DEL.
        let mut event = epoll_event { events: 0, u64: 0 };

        let rc = unsafe { epoll_ctl(self.epoll.as_raw_fd(), EPOLL_CTL_DEL, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    fn control(
        &self,
        op: libc::c_int,
        fd: RawFd,
        token: u64,
        interest: Interest,
    ) -> io::Result<()> {
        let mut event = epoll_event {
            events: mask(interest),
            u64: token,
        };

        let rc = unsafe { epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Waits for readiness.
    ///
    /// Blocks until:
    /// - at least one descriptor is ready,
    /// - the wakeup source fires,
    /// - or `timeout` (if any) expires.
    ///
    /// An interrupted wait (`EINTR`) returns `Ok` with no events.
    pub(crate) fn poll(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        events.clear();

        let timeout_ms = timeout
            .map(|t| t.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        let n = unsafe {
            epoll_wait(
                self.epoll.as_raw_fd(),
                events.raw.as_mut_ptr(),
                events.raw.capacity() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        unsafe {
            events.raw.set_len(n as usize);
        }

        for raw in &events.raw {
            let token = raw.u64;
            let flags = raw.events;

            if token == WAKE_TOKEN {
                self.waker.drain();
                events.woken = true;
                continue;
            }

            events.ready.push(Event {
                token,
                readable: flags & READ_FLAGS != 0,
                writable: flags & WRITE_FLAGS != 0,
            });
        }

        Ok(())
    }
}

/// Translates an interest into an epoll event mask.
fn mask(interest: Interest) -> u32 {
    let mut flags = 0;

    if interest.read {
        flags |= EPOLLIN | EPOLLRDHUP;
    }
    if interest.write {
        flags |= EPOLLOUT;
    }

    flags as u32
}
