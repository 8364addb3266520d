//! Interleaving of multiple flows.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::Result;
use crate::flow::{BoxFlowStream, FlowStream};

/// Stream for [`merge`](crate::flow::merge): round-robin interleaving of
/// several upstreams. Exhausted upstreams are dropped; the first failure
/// ends the merge.
#[must_use = "flows do nothing unless collected"]
pub struct Merge<T> {
    streams: VecDeque<BoxFlowStream<T>>,
    done: bool,
}

impl<T> Merge<T> {
    pub(crate) fn new(streams: Vec<BoxFlowStream<T>>) -> Self {
        Self {
            streams: streams.into(),
            done: false,
        }
    }
}

impl<T: Send> FlowStream for Merge<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        let len = this.streams.len();
        if len == 0 {
            this.done = true;
            return Poll::Ready(None);
        }

        for _ in 0..len {
            let Some(mut stream) = this.streams.pop_front() else {
                break;
            };
            match stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(value))) => {
                    this.streams.push_back(stream);
                    return Poll::Ready(Some(Ok(value)));
                }
                Poll::Ready(Some(Err(error))) => {
                    this.streams.clear();
                    this.done = true;
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(None) => {
                    // Source exhausted; drop it.
                }
                Poll::Pending => {
                    this.streams.push_back(stream);
                }
            }
        }

        if this.streams.is_empty() {
            this.done = true;
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}
