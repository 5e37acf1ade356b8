//! OS readiness poller.
//!
//! The reactor talks to the kernel only through this module:
//! - registering, updating and removing descriptor interest,
//! - blocking until descriptors become ready,
//! - interrupting that wait from another thread.
//!
//! Only the Linux `epoll` backend exists; the crate refuses to build
//! elsewhere.

pub(crate) mod common;

mod epoll;

pub(crate) type Poller = epoll::EpollPoller;
