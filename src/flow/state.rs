//! Hot state holder: a broadcast flow with a current value.

use std::sync::{Arc, Mutex, RwLock};

use super::shared::{SharedFlow, Subscription};
use super::Flow;
use crate::channel::Channel;
use crate::observability::FailureHandlers;

/// A [`SharedFlow`] that retains the most recent value and replays it to
/// each new subscriber.
///
/// Reads are lock-cheap; writes are serialized so that emission order
/// matches update order.
pub struct StateFlow<T> {
    shared: SharedFlow<T>,
    value: Arc<RwLock<T>>,
    /// Serializes `set`/`update` so emissions happen in write order.
    set_order: Arc<Mutex<()>>,
}

impl<T> Clone for StateFlow<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            value: Arc::clone(&self.value),
            set_order: Arc::clone(&self.set_order),
        }
    }
}

impl<T> std::fmt::Debug for StateFlow<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateFlow")
            .field("subscribers", &self.shared.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl<T> StateFlow<T>
where
    T: Clone + Send + 'static,
{
    /// Creates a state flow holding `initial`.
    #[must_use]
    pub fn new(initial: T) -> Self {
        Self::with_failure_handlers(initial, FailureHandlers::new())
    }

    /// Creates a state flow routing subscriber panics into `handlers`.
    #[must_use]
    pub fn with_failure_handlers(initial: T, handlers: FailureHandlers) -> Self {
        Self {
            shared: SharedFlow::with_failure_handlers(handlers),
            value: Arc::new(RwLock::new(initial)),
            set_order: Arc::new(Mutex::new(())),
        }
    }

    /// Returns a clone of the current value.
    #[must_use]
    pub fn value(&self) -> T {
        self.value
            .read()
            .expect("state flow value lock poisoned")
            .clone()
    }

    /// Replaces the current value and broadcasts it. Concurrent setters
    /// are serialized; subscribers observe values in serialization order.
    pub fn set(&self, value: T) {
        let _order = self
            .set_order
            .lock()
            .expect("state flow set lock poisoned");
        {
            let mut slot = self
                .value
                .write()
                .expect("state flow value lock poisoned");
            *slot = value.clone();
        }
        self.shared.emit(value);
    }

    /// Read-modify-write under the set lock, then broadcast the new
    /// value. Returns it.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> T {
        let _order = self
            .set_order
            .lock()
            .expect("state flow set lock poisoned");
        let new_value = {
            let mut slot = self
                .value
                .write()
                .expect("state flow value lock poisoned");
            let next = f(&slot);
            *slot = next.clone();
            next
        };
        self.shared.emit(new_value.clone());
        new_value
    }

    /// Attaches a subscriber, first invoking it synchronously with the
    /// current value.
    ///
    /// The replay and the attachment are two steps, not one atomic
    /// operation: a setter running between them is delivered neither as
    /// the replayed value nor as an emission, so the subscriber can
    /// briefly observe a stale value. Serialize subscription with updates
    /// externally if that matters.
    #[must_use]
    pub fn subscribe(&self, mut subscriber: impl FnMut(T) + Send + 'static) -> Subscription<T> {
        let current = self.value();
        subscriber(current);
        self.shared.subscribe(subscriber)
    }

    /// Number of attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscriber_count()
    }

    /// Adapts the holder into a cold [`Flow`] that first yields the
    /// current value, then every subsequent emission for the duration of
    /// the collection.
    #[must_use]
    pub fn as_flow(&self) -> Flow<T>
    where
        T: Sync,
    {
        let state = self.clone();
        Flow::from_factory(move |ctx| {
            let channel: Channel<T> = Channel::unbounded();
            let feed = channel.clone();
            // Same two-step window as subscribe: the seed value and the
            // attachment are not atomic against setters.
            let _ = channel.try_send(state.value());
            let subscription = state.shared.subscribe(move |value| {
                let _ = feed.try_send(value);
            });
            Box::pin(super::shared::subscribed_stream(
                channel.stream(&ctx),
                subscription,
            ))
        })
    }
}
