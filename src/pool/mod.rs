//! Worker thread pool.
//!
//! A [`WorkerPool`] owns a set of dedicated threads, each with a slot that
//! receives one job at a time. Idle slots sit on a free list; submitters
//! take one, hand over the job and return immediately. When the pool is at
//! its maximum and every slot is busy, submitters block until a slot frees
//! up.
//!
//! Jobs are fire-and-forget: completion is signalled by the job itself,
//! for instance through a channel it captures.
//!
//! # Panicking jobs
//!
//! A panic inside a job unwinds its worker thread. That slot never returns
//! to the free list and the thread is not replaced, so a bounded pool loses
//! one unit of capacity per panic. Jobs that may fail should catch their own
//! panics.

mod builder;
mod core;
mod worker;

pub use builder::WorkerPoolBuilder;
pub use core::WorkerPool;

pub(crate) const DEFAULT_THREAD_NAME: &str = "treadle-worker";
