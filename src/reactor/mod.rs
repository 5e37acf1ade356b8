//! Readiness reactor.
//!
//! This module implements an `epoll`-based reactor. The reactor is
//! responsible for:
//! - tracking read-ready and write-ready callbacks per descriptor,
//! - blocking until descriptors become ready and dispatching their
//!   callbacks on the driver thread,
//! - letting other threads interrupt the wait and run work on the driver
//!   thread through an `eventfd`.
//!
//! [`ReactiveQueue`] builds on the wakeup path to deliver items produced on
//! any thread to a consumer running on the driver thread.
//!
//! Callbacks run synchronously on the driver thread. A callback that blocks
//! stalls every other registration; offload long work to a
//! [`WorkerPool`](crate::WorkerPool).

mod builder;
mod core;
mod event;
mod poller;
mod queue;
mod registry;

pub use builder::ReactorBuilder;
pub use core::{Reactor, WakeupFn};
pub use poller::common::Interest;
pub use queue::ReactiveQueue;
