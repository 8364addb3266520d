//! Latest-value combination of two flows.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::Result;
use crate::flow::FlowStream;

/// Stream for the [`combine`](crate::flow::Flow::combine) operator.
///
/// Emits `f(latest_left, latest_right)` once per upstream emission after
/// both sides have produced at least one element. Ends when either side
/// ends.
#[must_use = "flows do nothing unless collected"]
pub struct Combine<A, B, T, U, R, F> {
    left: A,
    right: B,
    latest_left: Option<T>,
    latest_right: Option<U>,
    f: F,
    ready: VecDeque<R>,
    done: bool,
    ending: bool,
}

impl<A, B, T, U, R, F> Combine<A, B, T, U, R, F> {
    pub(crate) fn new(left: A, right: B, f: F) -> Self {
        Self {
            left,
            right,
            latest_left: None,
            latest_right: None,
            f,
            ready: VecDeque::new(),
            done: false,
            ending: false,
        }
    }
}

impl<A: Unpin, B: Unpin, T, U, R, F> Unpin for Combine<A, B, T, U, R, F> {}

impl<A, B, T, U, R, F> FlowStream for Combine<A, B, T, U, R, F>
where
    T: Clone + Send,
    U: Clone + Send,
    R: Send,
    A: FlowStream<Item = Result<T>> + Unpin,
    B: FlowStream<Item = Result<U>> + Unpin,
    F: FnMut(&T, &U) -> R + Send,
{
    type Item = Result<R>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        if !this.ending {
            loop {
                match Pin::new(&mut this.left).poll_next(cx) {
                    Poll::Ready(Some(Ok(value))) => {
                        this.latest_left = Some(value);
                        if let (Some(l), Some(r)) = (&this.latest_left, &this.latest_right) {
                            let combined = (this.f)(l, r);
                            this.ready.push_back(combined);
                        }
                    }
                    Poll::Ready(Some(Err(error))) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(error)));
                    }
                    Poll::Ready(None) => {
                        this.ending = true;
                        break;
                    }
                    Poll::Pending => break,
                }
            }
        }

        if !this.ending {
            loop {
                match Pin::new(&mut this.right).poll_next(cx) {
                    Poll::Ready(Some(Ok(value))) => {
                        this.latest_right = Some(value);
                        if let (Some(l), Some(r)) = (&this.latest_left, &this.latest_right) {
                            let combined = (this.f)(l, r);
                            this.ready.push_back(combined);
                        }
                    }
                    Poll::Ready(Some(Err(error))) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(error)));
                    }
                    Poll::Ready(None) => {
                        this.ending = true;
                        break;
                    }
                    Poll::Pending => break,
                }
            }
        }

        if let Some(combined) = this.ready.pop_front() {
            return Poll::Ready(Some(Ok(combined)));
        }
        if this.ending {
            this.done = true;
            return Poll::Ready(None);
        }
        Poll::Pending
    }
}
