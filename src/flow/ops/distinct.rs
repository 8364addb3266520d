//! Adjacent-duplicate suppression.

use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::Result;
use crate::flow::FlowStream;

/// Stream for the
/// [`distinct_until_changed`](crate::flow::Flow::distinct_until_changed)
/// operator: emits only when the new element differs from the previous
/// one; the first element always passes.
#[must_use = "flows do nothing unless collected"]
pub struct DistinctUntilChanged<S, T> {
    stream: S,
    last: Option<T>,
}

impl<S, T> DistinctUntilChanged<S, T> {
    pub(crate) fn new(stream: S) -> Self {
        Self { stream, last: None }
    }
}

impl<S: Unpin, T> Unpin for DistinctUntilChanged<S, T> {}

impl<T, S> FlowStream for DistinctUntilChanged<S, T>
where
    T: PartialEq + Clone + Send,
    S: FlowStream<Item = Result<T>> + Unpin,
{
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match Pin::new(&mut this.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(value))) => {
                    if this.last.as_ref() == Some(&value) {
                        continue;
                    }
                    this.last = Some(value.clone());
                    return Poll::Ready(Some(Ok(value)));
                }
                Poll::Ready(Some(Err(error))) => return Poll::Ready(Some(Err(error))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
