//! The producer-block flow constructor.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use super::{Flow, FlowStream};
use crate::context::JobContext;
use crate::error::{Error, Result};
use crate::job::Job;

/// Builds a cold flow from a producer block.
///
/// The producer receives a [`FlowCollector`] to emit into and the
/// collecting task's context. It is not invoked until a terminal operator
/// runs, and every collection invokes it afresh: no state survives
/// between collections.
///
/// The producer-consumer handoff is a one-slot buffer: `emit` suspends
/// until the consumer has taken the previous value, which gives exact
/// backpressure at depth one.
pub fn flow<T, F, Fut>(producer: F) -> Flow<T>
where
    T: Send + 'static,
    F: Fn(FlowCollector<T>, JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Flow::from_factory(move |ctx| {
        let slot = EmitSlot::new();
        let collector = FlowCollector {
            slot: slot.clone(),
            job: ctx.job().clone(),
        };
        let future = producer(collector, ctx);
        Box::pin(ProducerBridge {
            slot,
            future: Some(Box::pin(future)),
            pending_error: None,
            done: false,
        })
    })
}

struct EmitSlot<T> {
    value: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for EmitSlot<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> EmitSlot<T> {
    fn new() -> Self {
        Self {
            value: Arc::new(Mutex::new(None)),
        }
    }

    fn put(&self, value: T) {
        let mut slot = self.value.lock().expect("emit slot lock poisoned");
        debug_assert!(slot.is_none(), "emit slot overwritten; emits must be awaited");
        *slot = Some(value);
    }

    fn take(&self) -> Option<T> {
        self.value.lock().expect("emit slot lock poisoned").take()
    }

    fn is_empty(&self) -> bool {
        self.value.lock().expect("emit slot lock poisoned").is_none()
    }
}

/// The producer-side handle for emitting elements into a flow.
pub struct FlowCollector<T> {
    slot: EmitSlot<T>,
    job: Job,
}

impl<T> std::fmt::Debug for FlowCollector<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowCollector").finish_non_exhaustive()
    }
}

impl<T: Send> FlowCollector<T> {
    /// Emits a value downstream, suspending until the consumer takes it.
    ///
    /// Fails with a cancellation error once the collecting task's job has
    /// been cancelled.
    pub fn emit(&self, value: T) -> Emit<'_, T> {
        Emit {
            collector: self,
            value: Some(value),
        }
    }
}

/// Future returned by [`FlowCollector::emit`].
#[must_use = "futures do nothing unless polled"]
pub struct Emit<'a, T> {
    collector: &'a FlowCollector<T>,
    value: Option<T>,
}

impl<T> Unpin for Emit<'_, T> {}

impl<T: Send> Future for Emit<'_, T> {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.collector.job.is_cancel_requested() {
            let reason = this.collector.job.cancel_reason().unwrap_or_default();
            return Poll::Ready(Err(Error::cancelled(&reason)));
        }
        if let Some(value) = this.value.take() {
            this.collector.slot.put(value);
            // The bridge polls the producer again after consuming, which
            // resumes this future; no waker bookkeeping is needed inside
            // a single pipeline task.
            return Poll::Pending;
        }
        if this.collector.slot.is_empty() {
            Poll::Ready(Ok(()))
        } else {
            Poll::Pending
        }
    }
}

/// Bridges a push-style producer into the pull-style stream world.
struct ProducerBridge<T> {
    slot: EmitSlot<T>,
    future: Option<Pin<Box<dyn Future<Output = Result<()>> + Send>>>,
    pending_error: Option<Error>,
    done: bool,
}

impl<T: Send> FlowStream for ProducerBridge<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        if let Some(future) = this.future.as_mut() {
            match future.as_mut().poll(cx) {
                Poll::Ready(Ok(())) => this.future = None,
                Poll::Ready(Err(error)) => {
                    this.future = None;
                    this.pending_error = Some(error);
                }
                Poll::Pending => {}
            }
        }

        if let Some(value) = this.slot.take() {
            return Poll::Ready(Some(Ok(value)));
        }
        if let Some(error) = this.pending_error.take() {
            this.done = true;
            return Poll::Ready(Some(Err(error)));
        }
        if this.future.is_none() {
            this.done = true;
            return Poll::Ready(None);
        }
        Poll::Pending
    }
}
