//! Take combinators.

use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::Result;
use crate::flow::FlowStream;

/// Stream for the [`take`](crate::flow::Flow::take) operator.
///
/// `take(0)` ends immediately without ever polling upstream.
#[must_use = "flows do nothing unless collected"]
pub struct Take<S> {
    stream: S,
    remaining: usize,
}

impl<S> Take<S> {
    pub(crate) fn new(stream: S, remaining: usize) -> Self {
        Self { stream, remaining }
    }
}

impl<T, S> FlowStream for Take<S>
where
    S: FlowStream<Item = Result<T>> + Unpin,
{
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.remaining == 0 {
            return Poll::Ready(None);
        }
        match Pin::new(&mut this.stream).poll_next(cx) {
            Poll::Ready(Some(Ok(value))) => {
                this.remaining -= 1;
                Poll::Ready(Some(Ok(value)))
            }
            Poll::Ready(Some(Err(error))) => {
                this.remaining = 0;
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.remaining = 0;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Stream for the [`take_while`](crate::flow::Flow::take_while) operator.
#[must_use = "flows do nothing unless collected"]
pub struct TakeWhile<S, P> {
    stream: S,
    predicate: P,
    done: bool,
}

impl<S, P> TakeWhile<S, P> {
    pub(crate) fn new(stream: S, predicate: P) -> Self {
        Self {
            stream,
            predicate,
            done: false,
        }
    }
}

impl<S: Unpin, P> Unpin for TakeWhile<S, P> {}

impl<T, S, P> FlowStream for TakeWhile<S, P>
where
    S: FlowStream<Item = Result<T>> + Unpin,
    P: FnMut(&T) -> bool + Send,
{
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match Pin::new(&mut this.stream).poll_next(cx) {
            Poll::Ready(Some(Ok(value))) => {
                if (this.predicate)(&value) {
                    Poll::Ready(Some(Ok(value)))
                } else {
                    this.done = true;
                    Poll::Ready(None)
                }
            }
            Poll::Ready(Some(Err(error))) => {
                this.done = true;
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
