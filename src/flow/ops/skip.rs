//! Skip combinators.

use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::Result;
use crate::flow::FlowStream;

/// Stream for the [`skip`](crate::flow::Flow::skip) operator.
#[must_use = "flows do nothing unless collected"]
pub struct Skip<S> {
    stream: S,
    remaining: usize,
}

impl<S> Skip<S> {
    pub(crate) fn new(stream: S, remaining: usize) -> Self {
        Self { stream, remaining }
    }
}

impl<T, S> FlowStream for Skip<S>
where
    S: FlowStream<Item = Result<T>> + Unpin,
{
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match Pin::new(&mut this.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(value))) => {
                    if this.remaining == 0 {
                        return Poll::Ready(Some(Ok(value)));
                    }
                    this.remaining -= 1;
                }
                Poll::Ready(Some(Err(error))) => return Poll::Ready(Some(Err(error))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Stream for the [`skip_while`](crate::flow::Flow::skip_while) operator.
#[must_use = "flows do nothing unless collected"]
pub struct SkipWhile<S, P> {
    stream: S,
    predicate: P,
    skipping: bool,
}

impl<S, P> SkipWhile<S, P> {
    pub(crate) fn new(stream: S, predicate: P) -> Self {
        Self {
            stream,
            predicate,
            skipping: true,
        }
    }
}

impl<S: Unpin, P> Unpin for SkipWhile<S, P> {}

impl<T, S, P> FlowStream for SkipWhile<S, P>
where
    S: FlowStream<Item = Result<T>> + Unpin,
    P: FnMut(&T) -> bool + Send,
{
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match Pin::new(&mut this.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(value))) => {
                    if this.skipping && (this.predicate)(&value) {
                        continue;
                    }
                    this.skipping = false;
                    return Poll::Ready(Some(Ok(value)));
                }
                Poll::Ready(Some(Err(error))) => return Poll::Ready(Some(Err(error))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
