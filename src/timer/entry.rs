use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Instant;

/// Identifies a scheduled callback.
///
/// Ids are assigned in increasing order and never reused by a scheduler.
/// An id is live from `schedule` until the callback fires or is cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl TimerId {
    /// The raw sequence number.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Position of an entry in the time-ordered map.
///
/// Ordered by deadline first, then by id, so equal deadlines keep schedule
/// order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Key {
    pub(crate) deadline: Instant,
    pub(crate) id: TimerId,
}

/// Pending callbacks plus the stop flag, all behind the scheduler lock.
pub(crate) struct Timers<J> {
    /// Time-ordered entries.
    entries: BTreeMap<Key, J>,

    /// id -> deadline, to find an entry's key on cancel.
    index: HashMap<TimerId, Instant>,

    next_id: u64,

    pub(crate) stopped: bool,
}

impl<J> Timers<J> {
    pub(crate) fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            index: HashMap::new(),
            next_id: 0,
            stopped: false,
        }
    }

    pub(crate) fn insert(&mut self, deadline: Instant, callback: J) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        self.entries.insert(Key { deadline, id }, callback);
        self.index.insert(id, deadline);

        id
    }

    /// Removes a pending entry. `None` if it already fired, was cancelled or
    /// never existed.
    pub(crate) fn remove(&mut self, id: TimerId) -> Option<J> {
        let deadline = self.index.remove(&id)?;
        self.entries.remove(&Key { deadline, id })
    }

    /// Removes and returns the earliest entry if it is due at `now`.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<(TimerId, J)> {
        let entry = self.entries.first_entry()?;

        if entry.key().deadline > now {
            return None;
        }

        let (key, callback) = entry.remove_entry();
        self.index.remove(&key.id);

        Some((key.id, callback))
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|key| key.deadline)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
