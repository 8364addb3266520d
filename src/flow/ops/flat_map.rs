//! Flattening combinators.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::context::JobContext;
use crate::error::Result;
use crate::flow::{BoxFlowStream, Flow, FlowStream};

/// Stream for the
/// [`flat_map_concat`](crate::flow::Flow::flat_map_concat) operator:
/// fully drains the inner flow of each element before pulling the next
/// element from upstream.
#[must_use = "flows do nothing unless collected"]
pub struct FlatMapConcat<S, F, U> {
    outer: S,
    f: F,
    ctx: JobContext,
    inner: Option<BoxFlowStream<U>>,
    done: bool,
}

impl<S, F, U> FlatMapConcat<S, F, U> {
    pub(crate) fn new(outer: S, f: F, ctx: JobContext) -> Self {
        Self {
            outer,
            f,
            ctx,
            inner: None,
            done: false,
        }
    }
}

impl<S: Unpin, F, U> Unpin for FlatMapConcat<S, F, U> {}

impl<T, U, S, F> FlowStream for FlatMapConcat<S, F, U>
where
    T: Send,
    U: Send + 'static,
    S: FlowStream<Item = Result<T>> + Unpin,
    F: FnMut(T) -> Flow<U> + Send,
{
    type Item = Result<U>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        loop {
            if let Some(inner) = this.inner.as_mut() {
                match inner.as_mut().poll_next(cx) {
                    Poll::Ready(Some(Ok(value))) => return Poll::Ready(Some(Ok(value))),
                    Poll::Ready(Some(Err(error))) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(error)));
                    }
                    Poll::Ready(None) => {
                        this.inner = None;
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }

            match Pin::new(&mut this.outer).poll_next(cx) {
                Poll::Ready(Some(Ok(value))) => {
                    let flow = (this.f)(value);
                    this.inner = Some(flow.make_stream(&this.ctx));
                }
                Poll::Ready(Some(Err(error))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Stream for the [`flat_map_merge`](crate::flow::Flow::flat_map_merge)
/// operator: up to `limit` inner flows run at once and their emissions
/// interleave; upstream is only pulled while below the limit.
#[must_use = "flows do nothing unless collected"]
pub struct FlatMapMerge<S, F, U> {
    outer: S,
    f: F,
    ctx: JobContext,
    limit: usize,
    active: VecDeque<BoxFlowStream<U>>,
    outer_done: bool,
    done: bool,
}

impl<S, F, U> FlatMapMerge<S, F, U> {
    pub(crate) fn new(outer: S, f: F, ctx: JobContext, limit: usize) -> Self {
        Self {
            outer,
            f,
            ctx,
            limit,
            active: VecDeque::new(),
            outer_done: false,
            done: false,
        }
    }
}

impl<S: Unpin, F, U> Unpin for FlatMapMerge<S, F, U> {}

impl<T, U, S, F> FlowStream for FlatMapMerge<S, F, U>
where
    T: Send,
    U: Send + 'static,
    S: FlowStream<Item = Result<T>> + Unpin,
    F: FnMut(T) -> Flow<U> + Send,
{
    type Item = Result<U>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        // Admit new inner flows up to the concurrency limit.
        while !this.outer_done && this.active.len() < this.limit {
            match Pin::new(&mut this.outer).poll_next(cx) {
                Poll::Ready(Some(Ok(value))) => {
                    let flow = (this.f)(value);
                    this.active.push_back(flow.make_stream(&this.ctx));
                }
                Poll::Ready(Some(Err(error))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(None) => this.outer_done = true,
                Poll::Pending => break,
            }
        }

        let mut freed_slot = false;
        let rounds = this.active.len();
        for _ in 0..rounds {
            let Some(mut stream) = this.active.pop_front() else {
                break;
            };
            match stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(value))) => {
                    this.active.push_back(stream);
                    return Poll::Ready(Some(Ok(value)));
                }
                Poll::Ready(Some(Err(error))) => {
                    this.active.clear();
                    this.done = true;
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(None) => {
                    freed_slot = true;
                }
                Poll::Pending => {
                    this.active.push_back(stream);
                }
            }
        }

        if this.outer_done && this.active.is_empty() {
            this.done = true;
            return Poll::Ready(None);
        }
        // An inner just finished: try admitting + polling again right away
        // rather than waiting for an upstream waker.
        if freed_slot && !this.outer_done {
            cx.waker().wake_by_ref();
        }
        Poll::Pending
    }
}
