//! Producer/consumer decoupling combinators.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::{Error, Result};
use crate::flow::FlowStream;

/// Stream for the [`buffer`](crate::flow::Flow::buffer) operator: pulls
/// upstream eagerly into an `n`-slot queue; upstream is not polled while
/// the queue is full.
#[must_use = "flows do nothing unless collected"]
pub struct Buffer<S, T> {
    stream: S,
    queue: VecDeque<T>,
    capacity: usize,
    pending_error: Option<Error>,
    upstream_done: bool,
}

impl<S, T> Buffer<S, T> {
    pub(crate) fn new(stream: S, capacity: usize) -> Self {
        Self {
            stream,
            queue: VecDeque::with_capacity(capacity),
            capacity,
            pending_error: None,
            upstream_done: false,
        }
    }
}

impl<S: Unpin, T> Unpin for Buffer<S, T> {}

impl<T, S> FlowStream for Buffer<S, T>
where
    T: Send,
    S: FlowStream<Item = Result<T>> + Unpin,
{
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        while !this.upstream_done
            && this.pending_error.is_none()
            && this.queue.len() < this.capacity
        {
            match Pin::new(&mut this.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(value))) => this.queue.push_back(value),
                Poll::Ready(Some(Err(error))) => {
                    this.pending_error = Some(error);
                    this.upstream_done = true;
                }
                Poll::Ready(None) => this.upstream_done = true,
                Poll::Pending => break,
            }
        }

        if let Some(value) = this.queue.pop_front() {
            return Poll::Ready(Some(Ok(value)));
        }
        if let Some(error) = this.pending_error.take() {
            return Poll::Ready(Some(Err(error)));
        }
        if this.upstream_done {
            return Poll::Ready(None);
        }
        Poll::Pending
    }
}

/// Stream for the [`conflate`](crate::flow::Flow::conflate) operator: a
/// one-slot buffer that drops older unread values, keeping the latest.
#[must_use = "flows do nothing unless collected"]
pub struct Conflate<S, T> {
    stream: S,
    latest: Option<T>,
    pending_error: Option<Error>,
    upstream_done: bool,
}

impl<S, T> Conflate<S, T> {
    pub(crate) fn new(stream: S) -> Self {
        Self {
            stream,
            latest: None,
            pending_error: None,
            upstream_done: false,
        }
    }
}

impl<S: Unpin, T> Unpin for Conflate<S, T> {}

impl<T, S> FlowStream for Conflate<S, T>
where
    T: Send,
    S: FlowStream<Item = Result<T>> + Unpin,
{
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        while !this.upstream_done && this.pending_error.is_none() {
            match Pin::new(&mut this.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(value))) => this.latest = Some(value),
                Poll::Ready(Some(Err(error))) => {
                    this.pending_error = Some(error);
                    this.upstream_done = true;
                }
                Poll::Ready(None) => this.upstream_done = true,
                Poll::Pending => break,
            }
        }

        if let Some(value) = this.latest.take() {
            return Poll::Ready(Some(Ok(value)));
        }
        if let Some(error) = this.pending_error.take() {
            return Poll::Ready(Some(Err(error)));
        }
        if this.upstream_done {
            return Poll::Ready(None);
        }
        Poll::Pending
    }
}
