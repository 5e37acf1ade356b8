use super::core::Reactor;
use crate::callable::{BoxedFn, Invoke};

use log::trace;
use parking_lot::Mutex;
use std::mem;
use std::sync::Arc;

type Consumer<T> = Box<dyn FnMut(Vec<T>) + Send>;

struct Shared<T> {
    items: Mutex<Vec<T>>,
    consumer: Mutex<Option<Consumer<T>>>,
}

impl<T> Shared<T> {
    fn drain(&self) -> Vec<T> {
        mem::take(&mut *self.items.lock())
    }

    /// Hands everything queued so far to the consumer.
    ///
    /// The consumer is taken out of its slot while it runs, so it may push,
    /// drain or replace itself.
    fn consume(&self) {
        let Some(mut consumer) = self.consumer.lock().take() else {
            return;
        };

        let batch = self.drain();
        if !batch.is_empty() {
            consumer(batch);
        }

        let mut slot = self.consumer.lock();
        if slot.is_none() {
            *slot = Some(consumer);
        }
    }
}

/// A queue whose consumer runs on a reactor's driver thread.
///
/// Producers on any thread [`push`](Self::push) items; every push queues a
/// wakeup on the reactor, and the driver thread hands the accumulated batch
/// to the consumer installed with [`set_consumer`](Self::set_consumer).
/// Pushes that arrive while the consumer is already draining end up in the
/// same batch, so the consumer may see fewer batches than pushes.
///
/// Without a consumer items accumulate until [`drain`](Self::drain) is
/// called. The same holds once the reactor is stopped: the consumer is not
/// scheduled any more.
pub struct ReactiveQueue<T, C: Invoke = BoxedFn> {
    reactor: Arc<Reactor<C>>,
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static, C: Invoke> ReactiveQueue<T, C> {
    pub fn new(reactor: Arc<Reactor<C>>) -> Self {
        Self {
            reactor,
            shared: Arc::new(Shared {
                items: Mutex::new(Vec::new()),
                consumer: Mutex::new(None),
            }),
        }
    }

    /// Installs the callback that receives batches on the driver thread.
    pub fn set_consumer<F>(&self, consumer: F)
    where
        F: FnMut(Vec<T>) + Send + 'static,
    {
        *self.shared.consumer.lock() = Some(Box::new(consumer));
    }

    /// Removes the consumer; later items stay queued.
    pub fn clear_consumer(&self) {
        self.shared.consumer.lock().take();
    }

    /// Appends `item` and schedules the consumer on the driver thread.
    ///
    /// Returns the queue length right after the push.
    pub fn push(&self, item: T) -> usize {
        let len = {
            let mut items = self.shared.items.lock();
            items.push(item);
            items.len()
        };

        trace!("reactive queue push (len {len})");

        let shared = self.shared.clone();
        self.reactor
            .wake_up(Some(Box::new(move || shared.consume())));

        len
    }

    /// Takes every queued item.
    pub fn drain(&self) -> Vec<T> {
        self.shared.drain()
    }

    pub fn len(&self) -> usize {
        self.shared.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T, C: Invoke> Clone for ReactiveQueue<T, C> {
    fn clone(&self) -> Self {
        Self {
            reactor: self.reactor.clone(),
            shared: self.shared.clone(),
        }
    }
}
