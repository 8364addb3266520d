//! Element-wise transform and filter combinators.

use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::Result;
use crate::flow::FlowStream;

/// Stream for the [`map`](crate::flow::Flow::map) operator.
#[must_use = "flows do nothing unless collected"]
pub struct Map<S, F> {
    stream: S,
    f: F,
}

impl<S, F> Map<S, F> {
    pub(crate) fn new(stream: S, f: F) -> Self {
        Self { stream, f }
    }
}

impl<S: Unpin, F> Unpin for Map<S, F> {}

impl<T, U, S, F> FlowStream for Map<S, F>
where
    S: FlowStream<Item = Result<T>> + Unpin,
    F: FnMut(T) -> U + Send,
{
    type Item = Result<U>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.stream).poll_next(cx) {
            Poll::Ready(Some(Ok(value))) => Poll::Ready(Some(Ok((this.f)(value)))),
            Poll::Ready(Some(Err(error))) => Poll::Ready(Some(Err(error))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Stream for the [`filter`](crate::flow::Flow::filter) operator.
#[must_use = "flows do nothing unless collected"]
pub struct Filter<S, P> {
    stream: S,
    predicate: P,
}

impl<S, P> Filter<S, P> {
    pub(crate) fn new(stream: S, predicate: P) -> Self {
        Self { stream, predicate }
    }
}

impl<S: Unpin, P> Unpin for Filter<S, P> {}

impl<T, S, P> FlowStream for Filter<S, P>
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
                    if (this.predicate)(&value) {
                        return Poll::Ready(Some(Ok(value)));
                    }
                }
                Poll::Ready(Some(Err(error))) => return Poll::Ready(Some(Err(error))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
