//! Time-based rate shaping combinators.
//!
//! Both operators measure time in the collecting context's time source:
//! real under normal execution, virtual under the test harness. Zero
//! intervals mean immediate.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::context::JobContext;
use crate::error::Result;
use crate::flow::FlowStream;
use crate::time::Sleep;
use crate::types::Time;

/// Stream for the [`debounce`](crate::flow::Flow::debounce) operator.
///
/// An element is emitted only once `interval` of quiet time has elapsed
/// since it arrived; a newer element restarts the clock and replaces the
/// held one. The final held element is emitted when upstream ends.
#[must_use = "flows do nothing unless collected"]
pub struct Debounce<S, T> {
    stream: S,
    ctx: JobContext,
    interval: Duration,
    held: Option<T>,
    quiet: Option<Sleep>,
    upstream_done: bool,
    done: bool,
}

impl<S, T> Debounce<S, T> {
    pub(crate) fn new(stream: S, ctx: JobContext, interval: Duration) -> Self {
        Self {
            stream,
            ctx,
            interval,
            held: None,
            quiet: None,
            upstream_done: false,
            done: false,
        }
    }

    fn rearm(&mut self) {
        self.quiet = Some(Sleep::after(
            Arc::clone(self.ctx.time()),
            self.interval,
            Some(self.ctx.job().clone()),
        ));
    }
}

impl<S: Unpin, T> Unpin for Debounce<S, T> {}

impl<T, S> FlowStream for Debounce<S, T>
where
    T: Send,
    S: FlowStream<Item = Result<T>> + Unpin,
{
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        while !this.upstream_done {
            match Pin::new(&mut this.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(value))) => {
                    if this.interval.is_zero() {
                        return Poll::Ready(Some(Ok(value)));
                    }
                    this.held = Some(value);
                    this.rearm();
                }
                Poll::Ready(Some(Err(error))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(None) => {
                    this.upstream_done = true;
                    if let Some(value) = this.held.take() {
                        return Poll::Ready(Some(Ok(value)));
                    }
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => break,
            }
        }

        if this.upstream_done && this.held.is_none() {
            this.done = true;
            return Poll::Ready(None);
        }

        if let Some(quiet) = this.quiet.as_mut() {
            match Pin::new(quiet).poll(cx) {
                Poll::Ready(Ok(())) => {
                    this.quiet = None;
                    if let Some(value) = this.held.take() {
                        return Poll::Ready(Some(Ok(value)));
                    }
                }
                Poll::Ready(Err(error)) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Pending => {}
            }
        }
        Poll::Pending
    }
}

/// Stream for the [`sample`](crate::flow::Flow::sample) operator.
///
/// Emits the latest-seen element on each periodic tick; ticks with no
/// fresh element are skipped. Ends when upstream ends, dropping any
/// unsampled element.
#[must_use = "flows do nothing unless collected"]
pub struct Sample<S, T> {
    stream: S,
    ctx: JobContext,
    interval: Duration,
    latest: Option<T>,
    next_tick: Option<Time>,
    ticker: Option<Sleep>,
    done: bool,
}

impl<S, T> Sample<S, T> {
    pub(crate) fn new(stream: S, ctx: JobContext, interval: Duration) -> Self {
        Self {
            stream,
            ctx,
            interval,
            latest: None,
            next_tick: None,
            ticker: None,
            done: false,
        }
    }

    fn arm(&mut self) {
        let deadline = match self.next_tick {
            Some(previous) => previous + self.interval,
            None => self.ctx.now() + self.interval,
        };
        self.next_tick = Some(deadline);
        self.ticker = Some(Sleep::until(
            Arc::clone(self.ctx.time()),
            deadline,
            Some(self.ctx.job().clone()),
        ));
    }
}

impl<S: Unpin, T> Unpin for Sample<S, T> {}

impl<T, S> FlowStream for Sample<S, T>
where
    T: Send,
    S: FlowStream<Item = Result<T>> + Unpin,
{
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            match Pin::new(&mut this.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(value))) => {
                    if this.interval.is_zero() {
                        return Poll::Ready(Some(Ok(value)));
                    }
                    this.latest = Some(value);
                }
                Poll::Ready(Some(Err(error))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(None) => {
                    // Unsampled elements are dropped at the end.
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => break,
            }
        }

        if this.interval.is_zero() {
            return Poll::Pending;
        }

        if this.ticker.is_none() {
            this.arm();
        }
        // Ticks fire even while no fresh element exists; a tick with no
        // element is skipped and the ticker rearmed for periodicity.
        loop {
            let Some(ticker) = this.ticker.as_mut() else {
                break;
            };
            match Pin::new(ticker).poll(cx) {
                Poll::Ready(Ok(())) => {
                    this.ticker = None;
                    let fresh = this.latest.take();
                    this.arm();
                    if let Some(value) = fresh {
                        return Poll::Ready(Some(Ok(value)));
                    }
                }
                Poll::Ready(Err(error)) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Pending => break,
            }
        }
        Poll::Pending
    }
}
