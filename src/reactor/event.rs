/// Readiness reported for one registered descriptor.
pub(crate) struct Event {
    /// Token of the registration the kernel reported.
    pub(crate) token: u64,

    /// Readable, hung up or in error.
    pub(crate) readable: bool,

    /// Writable, hung up or in error.
    pub(crate) writable: bool,
}

/// Reusable buffers for one `epoll_wait` round.
///
/// `raw` receives the kernel's records; `ready` holds them translated into
/// [`Event`]s. `woken` records whether the wakeup source fired.
pub(crate) struct Events {
    pub(crate) raw: Vec<libc::epoll_event>,
    pub(crate) ready: Vec<Event>,
    pub(crate) woken: bool,
}

impl Events {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            raw: Vec::with_capacity(capacity),
            ready: Vec::with_capacity(capacity),
            woken: false,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.raw.clear();
        self.ready.clear();
        self.woken = false;
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Event> {
        self.ready.iter()
    }
}
