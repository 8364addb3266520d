//! Lockstep pairing of two flows.

use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::Result;
use crate::flow::FlowStream;

/// Stream for the [`zip`](crate::flow::Flow::zip) operator: element `i`
/// of the output pairs element `i` of each upstream; the output ends as
/// soon as either upstream ends.
#[must_use = "flows do nothing unless collected"]
pub struct Zip<A, B, T, U> {
    left: A,
    right: B,
    pending_left: Option<T>,
    pending_right: Option<U>,
    done: bool,
}

impl<A, B, T, U> Zip<A, B, T, U> {
    pub(crate) fn new(left: A, right: B) -> Self {
        Self {
            left,
            right,
            pending_left: None,
            pending_right: None,
            done: false,
        }
    }
}

impl<A: Unpin, B: Unpin, T, U> Unpin for Zip<A, B, T, U> {}

impl<A, B, T, U> FlowStream for Zip<A, B, T, U>
where
    T: Send,
    U: Send,
    A: FlowStream<Item = Result<T>> + Unpin,
    B: FlowStream<Item = Result<U>> + Unpin,
{
    type Item = Result<(T, U)>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        if this.pending_left.is_none() {
            match Pin::new(&mut this.left).poll_next(cx) {
                Poll::Ready(Some(Ok(value))) => this.pending_left = Some(value),
                Poll::Ready(Some(Err(error))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => {}
            }
        }

        if this.pending_right.is_none() {
            match Pin::new(&mut this.right).poll_next(cx) {
                Poll::Ready(Some(Ok(value))) => this.pending_right = Some(value),
                Poll::Ready(Some(Err(error))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => {}
            }
        }

        if this.pending_left.is_some() && this.pending_right.is_some() {
            let left = this.pending_left.take();
            let right = this.pending_right.take();
            if let (Some(left), Some(right)) = (left, right) {
                return Poll::Ready(Some(Ok((left, right))));
            }
        }
        Poll::Pending
    }
}
