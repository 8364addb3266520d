//! Progressive accumulation.

use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::Result;
use crate::flow::FlowStream;

/// Stream for the [`scan`](crate::flow::Flow::scan) operator: emits the
/// initial accumulator first, then each progressive accumulation.
#[must_use = "flows do nothing unless collected"]
pub struct Scan<S, A, F> {
    stream: S,
    acc: A,
    f: F,
    emitted_init: bool,
}

impl<S, A, F> Scan<S, A, F> {
    pub(crate) fn new(stream: S, init: A, f: F) -> Self {
        Self {
            stream,
            acc: init,
            f,
            emitted_init: false,
        }
    }
}

impl<S: Unpin, A, F> Unpin for Scan<S, A, F> {}

impl<T, A, S, F> FlowStream for Scan<S, A, F>
where
    A: Clone + Send,
    S: FlowStream<Item = Result<T>> + Unpin,
    F: FnMut(&A, T) -> A + Send,
{
    type Item = Result<A>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if !this.emitted_init {
            this.emitted_init = true;
            return Poll::Ready(Some(Ok(this.acc.clone())));
        }
        match Pin::new(&mut this.stream).poll_next(cx) {
            Poll::Ready(Some(Ok(value))) => {
                this.acc = (this.f)(&this.acc, value);
                Poll::Ready(Some(Ok(this.acc.clone())))
            }
            Poll::Ready(Some(Err(error))) => Poll::Ready(Some(Err(error))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
