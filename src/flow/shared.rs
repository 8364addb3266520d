//! Hot broadcast holder.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use super::Flow;
use crate::channel::Channel;
use crate::error::Error;
use crate::observability::FailureHandlers;
use crate::types::SubscriptionId;

type SubscriberFn<T> = Arc<Mutex<Box<dyn FnMut(T) + Send>>>;

struct SharedFlowInner<T> {
    subscribers: Mutex<Vec<(SubscriptionId, SubscriberFn<T>)>>,
    /// Serializes emissions so subscribers observe a total order.
    emit_order: Mutex<()>,
    handlers: FailureHandlers,
}

/// A hot broadcast flow: many subscribers, no buffering, no replay.
///
/// `emit` delivers the value to a snapshot of the current subscribers in
/// subscription order, synchronously, one after the other. Late
/// subscribers miss earlier emissions. A panicking subscriber is routed
/// to the uncaught-failure handler chain and does not prevent later
/// subscribers from receiving the value.
pub struct SharedFlow<T> {
    inner: Arc<SharedFlowInner<T>>,
}

impl<T> Clone for SharedFlow<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for SharedFlow<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedFlow")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<T> Default for SharedFlow<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SharedFlow<T>
where
    T: Clone + Send + 'static,
{
    /// Creates a broadcast flow with no subscribers. Subscriber panics
    /// are logged through a fresh handler chain.
    #[must_use]
    pub fn new() -> Self {
        Self::with_failure_handlers(FailureHandlers::new())
    }

    /// Creates a broadcast flow routing subscriber panics into `handlers`.
    #[must_use]
    pub fn with_failure_handlers(handlers: FailureHandlers) -> Self {
        Self {
            inner: Arc::new(SharedFlowInner {
                subscribers: Mutex::new(Vec::new()),
                emit_order: Mutex::new(()),
                handlers,
            }),
        }
    }

    /// Attaches a subscriber; the returned handle removes it on disposal
    /// (or drop). Subscription ids are strictly increasing.
    #[must_use]
    pub fn subscribe(&self, subscriber: impl FnMut(T) + Send + 'static) -> Subscription<T> {
        let id = SubscriptionId::next();
        self.inner
            .subscribers
            .lock()
            .expect("shared flow subscribers lock poisoned")
            .push((id, Arc::new(Mutex::new(Box::new(subscriber)))));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Broadcasts a value to every current subscriber, in subscription
    /// order.
    pub fn emit(&self, value: T) {
        let _order = self
            .inner
            .emit_order
            .lock()
            .expect("shared flow emit lock poisoned");
        let snapshot: Vec<SubscriberFn<T>> = self
            .inner
            .subscribers
            .lock()
            .expect("shared flow subscribers lock poisoned")
            .iter()
            .map(|(_, subscriber)| Arc::clone(subscriber))
            .collect();

        for subscriber in snapshot {
            let value = value.clone();
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                let mut subscriber = subscriber
                    .lock()
                    .expect("shared flow subscriber lock poisoned");
                subscriber(value);
            }));
            if let Err(payload) = outcome {
                let error = Error::panic(payload.as_ref()).with_context("subscriber panicked");
                self.inner.handlers.report(None, &error);
            }
        }
    }

    /// Adapts the holder into a cold [`Flow`]: each collection subscribes
    /// for its own duration, buffering emissions in an unbounded channel
    /// so a slow collector does not stall the broadcast.
    #[must_use]
    pub fn as_flow(&self) -> Flow<T> {
        let shared = self.clone();
        Flow::from_factory(move |ctx| {
            let channel: Channel<T> = Channel::unbounded();
            let feed = channel.clone();
            let subscription = shared.subscribe(move |value| {
                let _ = feed.try_send(value);
            });
            Box::pin(SubscribedStream {
                stream: channel.stream(&ctx),
                _subscription: subscription,
            })
        })
    }
}

impl<T> SharedFlow<T> {
    /// Number of attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .expect("shared flow subscribers lock poisoned")
            .len()
    }
}

/// Keeps a subscriber attached; disposing (or dropping) removes it.
#[derive(Debug)]
#[must_use = "dropping the subscription detaches the subscriber"]
pub struct Subscription<T> {
    id: SubscriptionId,
    inner: Weak<SharedFlowInner<T>>,
}

impl<T> Subscription<T> {
    /// Returns this subscription's id.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Detaches the subscriber. Equivalent to dropping the handle.
    pub fn dispose(self) {
        drop(self);
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .subscribers
                .lock()
                .expect("shared flow subscribers lock poisoned")
                .retain(|(id, _)| *id != self.id);
        }
    }
}

pub(crate) struct SubscribedStream<T> {
    stream: crate::channel::ChannelStream<T>,
    _subscription: Subscription<T>,
}

/// Ties a channel-backed stream's lifetime to a subscription.
pub(crate) fn subscribed_stream<T>(
    stream: crate::channel::ChannelStream<T>,
    subscription: Subscription<T>,
) -> SubscribedStream<T> {
    SubscribedStream {
        stream,
        _subscription: subscription,
    }
}

impl<T: Send + 'static> super::FlowStream for SubscribedStream<T> {
    type Item = crate::error::Result<T>;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let this = self.get_mut();
        std::pin::Pin::new(&mut this.stream).poll_next(cx)
    }
}
