//! Failure recovery combinators.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::context::JobContext;
use crate::error::{Error, Result};
use crate::flow::{BoxFlowStream, Flow, FlowStream};
use crate::time::Sleep;

/// Stream for the [`catch`](crate::flow::Flow::catch) operator: on an
/// upstream failure, continues with the flow returned by the handler.
/// Failures of the replacement flow are not re-caught.
#[must_use = "flows do nothing unless collected"]
pub struct Catch<T> {
    stream: BoxFlowStream<T>,
    handler: Arc<dyn Fn(Error) -> Flow<T> + Send + Sync>,
    ctx: JobContext,
    switched: bool,
}

impl<T: Send + 'static> Catch<T> {
    pub(crate) fn new(
        stream: BoxFlowStream<T>,
        handler: Arc<dyn Fn(Error) -> Flow<T> + Send + Sync>,
        ctx: JobContext,
    ) -> Self {
        Self {
            stream,
            handler,
            ctx,
            switched: false,
        }
    }
}

impl<T: Send + 'static> FlowStream for Catch<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Err(error))) if !this.switched => {
                    this.switched = true;
                    let replacement = (this.handler)(error);
                    this.stream = replacement.make_stream(&this.ctx);
                }
                other => return other,
            }
        }
    }
}

/// Stream for the [`retry_when`](crate::flow::Flow::retry_when) operator
/// (and [`retry`](crate::flow::Flow::retry) built on it): restarts the
/// upstream flow from scratch after a failure the predicate accepts,
/// sleeping the backoff delay between attempts.
#[must_use = "flows do nothing unless collected"]
pub struct Retry<T> {
    flow: Flow<T>,
    ctx: JobContext,
    stream: BoxFlowStream<T>,
    predicate: Arc<dyn Fn(&Error, u32) -> bool + Send + Sync>,
    delay: Arc<dyn Fn(u32) -> Duration + Send + Sync>,
    failures: u32,
    backoff: Option<Sleep>,
    done: bool,
}

impl<T: Send + 'static> Retry<T> {
    pub(crate) fn new(
        flow: Flow<T>,
        ctx: JobContext,
        predicate: Arc<dyn Fn(&Error, u32) -> bool + Send + Sync>,
        delay: Arc<dyn Fn(u32) -> Duration + Send + Sync>,
    ) -> Self {
        let stream = flow.make_stream(&ctx);
        Self {
            flow,
            ctx,
            stream,
            predicate,
            delay,
            failures: 0,
            backoff: None,
            done: false,
        }
    }
}

impl<T: Send + 'static> FlowStream for Retry<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        loop {
            if let Some(backoff) = this.backoff.as_mut() {
                match Pin::new(backoff).poll(cx) {
                    Poll::Ready(Ok(())) => {
                        this.backoff = None;
                        this.stream = this.flow.make_stream(&this.ctx);
                    }
                    Poll::Ready(Err(error)) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(error)));
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }

            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Err(error))) => {
                    // A retried upstream re-emits from scratch, previously
                    // seen elements included.
                    this.failures += 1;
                    if error.is_cancelled() || !(this.predicate)(&error, this.failures) {
                        this.done = true;
                        return Poll::Ready(Some(Err(error)));
                    }
                    let delay = (this.delay)(this.failures);
                    this.backoff = Some(Sleep::after(
                        Arc::clone(this.ctx.time()),
                        delay,
                        Some(this.ctx.job().clone()),
                    ));
                }
                other => return other,
            }
        }
    }
}
