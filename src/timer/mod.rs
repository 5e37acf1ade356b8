//! Deferred callback scheduler.
//!
//! [`Scheduler::schedule`] registers a callback to run after a delay and
//! returns a [`TimerId`]; [`Scheduler::cancel`] withdraws it. One thread
//! drives [`Scheduler::run`], which sleeps until the earliest deadline and
//! fires due callbacks in order.
//!
//! Each entry either fires or is cancelled, never both, and never twice.

mod core;
mod entry;

pub use core::Scheduler;
pub use entry::TimerId;
