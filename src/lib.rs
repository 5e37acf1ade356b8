//! # Treadle
//!
//! **Treadle** is a small set of blocking-thread building blocks for network
//! services. It does not ship an async runtime: every component owns plain OS
//! threads, mutexes and condition variables, and hands callables across thread
//! boundaries with at-most-once execution guarantees.
//!
//! It provides:
//!
//! - A **readiness reactor** over Linux `epoll`, dispatching read-ready and
//!   write-ready callbacks on a single driver thread, with an `eventfd`
//!   wakeup path usable from any thread
//! - A **worker pool** of dedicated threads, bounded or growable, that reuses
//!   idle workers and blocks submitters when saturated
//! - A **deferred scheduler** that fires callbacks in deadline order and
//!   supports race-free cancellation
//! - An **inline callable** with fixed in-place storage and no heap
//!   allocation
//!
//! The three components never depend on each other. Applications compose
//! them by wiring callbacks, typically a reactor callback that offloads work
//! to the pool.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::thread;
//! use std::time::Duration;
//! use treadle::Scheduler;
//!
//! let scheduler = Arc::new(Scheduler::new());
//! let driver = {
//!     let scheduler = scheduler.clone();
//!     thread::spawn(move || scheduler.run())
//! };
//!
//! let stopper = scheduler.clone();
//! scheduler.schedule(Duration::from_millis(10), move || stopper.stop());
//!
//! driver.join().unwrap();
//! ```
//!
//! ## Modules
//!
//! - [`reactor`]: `epoll` readiness reactor and the reactive queue
//! - [`pool`]: worker thread pool
//! - [`timer`]: deferred scheduler
//! - [`callable`]: fixed-capacity inline callable

#[cfg(not(target_os = "linux"))]
compile_error!("treadle only supports Linux (epoll + eventfd)");

mod error;

pub mod callable;
pub mod pool;
pub mod reactor;
pub mod timer;

pub use callable::{BoundedFn, BoxedFn, BoxedFnOnce, Invoke, InvokeOnce};
pub use error::{EmptyCallableError, ReactorInitError, SpawnError};
pub use pool::{WorkerPool, WorkerPoolBuilder};
pub use reactor::{Interest, ReactiveQueue, Reactor, ReactorBuilder};
pub use timer::{Scheduler, TimerId};
