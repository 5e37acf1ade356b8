use super::core::{DEFAULT_EVENT_CAPACITY, Reactor};
use crate::callable::Invoke;
use crate::error::ReactorInitError;

/// Builder for configuring and creating a [`Reactor`].
///
/// # Examples
///
/// ```rust,ignore
/// let reactor = ReactorBuilder::new()
///     .event_capacity(256)
///     .build()?;
/// ```
pub struct ReactorBuilder {
    /// Maximum number of events collected by one `epoll_wait`.
    event_capacity: usize,
}

impl ReactorBuilder {
    /// Creates a builder with the default event capacity (64).
    pub fn new() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Sets how many ready events one loop iteration can collect.
    ///
    /// Extra ready descriptors are simply reported by the next wait.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn event_capacity(mut self, n: usize) -> Self {
        assert!(n > 0, "event_capacity must be > 0");

        self.event_capacity = n;
        self
    }

    /// Builds the reactor.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorInitError`] if the OS resources cannot be created.
    pub fn build(self) -> Result<Reactor, ReactorInitError> {
        Reactor::with_capacity(self.event_capacity)
    }

    /// Builds a reactor storing its callbacks as `C`.
    ///
    /// # Errors
    ///
    /// Same as [`build`](Self::build).
    pub fn build_with_storage<C: Invoke>(self) -> Result<Reactor<C>, ReactorInitError> {
        Reactor::with_capacity(self.event_capacity)
    }
}

impl Default for ReactorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
