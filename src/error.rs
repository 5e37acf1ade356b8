use std::io;
use thiserror::Error;

/// Failure to build a [`Reactor`](crate::Reactor).
///
/// These are fatal: no partially constructed reactor is ever returned.
#[derive(Debug, Error)]
pub enum ReactorInitError {
    /// `epoll_create1` failed.
    #[error("failed to create epoll instance: {0}")]
    Poller(#[source] io::Error),

    /// `eventfd` failed.
    #[error("failed to create wakeup eventfd: {0}")]
    WakeupSource(#[source] io::Error),

    /// The wakeup eventfd could not be added to the epoll set.
    #[error("failed to register wakeup eventfd: {0}")]
    WakeupRegistration(#[source] io::Error),
}

/// Failure to start a worker thread.
#[derive(Debug, Error)]
#[error("failed to spawn worker thread #{index}: {source}")]
pub struct SpawnError {
    /// Index of the slot whose thread could not be started.
    pub index: usize,

    #[source]
    pub source: io::Error,
}

/// Returned when an empty [`BoundedFn`](crate::BoundedFn) is invoked.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("called an empty callable")]
pub struct EmptyCallableError;
