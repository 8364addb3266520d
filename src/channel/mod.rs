//! Bounded, unbounded, and rendezvous FIFO channels.
//!
//! A [`Channel`] is a single cloneable handle carrying both endpoints.
//! Senders suspend while the buffer is full (or, for rendezvous, until a
//! receiver is waiting); receivers suspend while it is empty. Closing
//! wakes every waiter; receivers after close drain the remaining items
//! and then observe the end of the stream, with an optional close cause
//! raised to the first receiver that reaches it.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use crate::context::JobContext;
use crate::error::Error;
use crate::flow::{Flow, FlowStream};

/// Error returned when sending fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError<T> {
    /// The channel is closed.
    Closed(T),
    /// The send was cancelled before the value was enqueued.
    Cancelled(T),
    /// The channel is full (`try_send` only).
    Full(T),
}

impl<T> SendError<T> {
    /// Recovers the value that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Closed(v) | Self::Cancelled(v) | Self::Full(v) => v,
        }
    }
}

impl<T> std::fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed(_) => write!(f, "sending on a closed channel"),
            Self::Cancelled(_) => write!(f, "send operation cancelled"),
            Self::Full(_) => write!(f, "channel is full"),
        }
    }
}

impl<T: std::fmt::Debug> std::error::Error for SendError<T> {}

/// Error returned when receiving fails.
#[derive(Debug, Clone)]
pub enum RecvError {
    /// The channel is closed and drained.
    Closed,
    /// The channel closed with a cause, observed exactly once.
    Failed(Error),
    /// The receive was cancelled.
    Cancelled,
    /// The channel is empty (`try_recv` only).
    Empty,
}

impl std::fmt::Display for RecvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "receiving on a closed channel"),
            Self::Failed(cause) => write!(f, "channel closed with failure: {cause}"),
            Self::Cancelled => write!(f, "receive operation cancelled"),
            Self::Empty => write!(f, "channel is empty"),
        }
    }
}

impl std::error::Error for RecvError {}

impl From<RecvError> for Error {
    fn from(err: RecvError) -> Self {
        match err {
            RecvError::Closed => Error::new(crate::error::ErrorKind::ChannelClosed),
            RecvError::Failed(cause) => cause,
            RecvError::Cancelled => Error::new(crate::error::ErrorKind::Cancelled),
            RecvError::Empty => Error::new(crate::error::ErrorKind::ChannelEmpty),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capacity {
    Unbounded,
    Bounded(usize),
    Rendezvous,
}

struct ChannelInner<T> {
    queue: VecDeque<T>,
    capacity: Capacity,
    closed: bool,
    cause: Option<Error>,
    cause_taken: bool,
    send_wakers: VecDeque<Waker>,
    recv_wakers: VecDeque<Waker>,
    /// Receivers currently parked. Rendezvous sends hand off only while
    /// this is non-zero.
    waiting_receivers: usize,
}

impl<T> ChannelInner<T> {
    fn can_accept(&self) -> bool {
        match self.capacity {
            Capacity::Unbounded => true,
            Capacity::Bounded(n) => self.queue.len() < n,
            Capacity::Rendezvous => self.queue.is_empty() && self.waiting_receivers > 0,
        }
    }

    fn wake_one_sender(&mut self) {
        if let Some(waker) = self.send_wakers.pop_front() {
            waker.wake();
        }
    }

    fn wake_one_receiver(&mut self) {
        if let Some(waker) = self.recv_wakers.pop_front() {
            waker.wake();
        }
    }

    fn wake_everyone(&mut self) {
        for waker in self.send_wakers.drain(..) {
            waker.wake();
        }
        for waker in self.recv_wakers.drain(..) {
            waker.wake();
        }
    }
}

/// A FIFO channel handle; cloning shares the channel.
pub struct Channel<T> {
    inner: Arc<Mutex<ChannelInner<T>>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("channel lock poisoned");
        f.debug_struct("Channel")
            .field("len", &inner.queue.len())
            .field("capacity", &inner.capacity)
            .field("closed", &inner.closed)
            .finish()
    }
}

impl<T: Send + 'static> Channel<T> {
    fn with_capacity(capacity: Capacity) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChannelInner {
                queue: VecDeque::new(),
                capacity,
                closed: false,
                cause: None,
                cause_taken: false,
                send_wakers: VecDeque::new(),
                recv_wakers: VecDeque::new(),
                waiting_receivers: 0,
            })),
        }
    }

    /// Creates a channel with no capacity limit; `send` never suspends
    /// for space.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::with_capacity(Capacity::Unbounded)
    }

    /// Creates a channel buffering at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; use [`Channel::rendezvous`] for the
    /// zero-buffer variant.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        assert!(capacity > 0, "bounded channel capacity must be non-zero");
        Self::with_capacity(Capacity::Bounded(capacity))
    }

    /// Creates a zero-buffer channel: each send waits for a receiver to
    /// be ready, then hands the value off through a one-slot exchange.
    #[must_use]
    pub fn rendezvous() -> Self {
        Self::with_capacity(Capacity::Rendezvous)
    }

    /// Sends a value, suspending while the channel cannot accept it.
    pub fn send<'a>(&'a self, ctx: &'a JobContext, value: T) -> SendFuture<'a, T> {
        SendFuture {
            channel: self,
            ctx,
            value: Some(value),
        }
    }

    /// Non-blocking send. Succeeds iff the buffer can accept the value
    /// and the channel is not closed; no state change otherwise.
    pub fn try_send(&self, value: T) -> Result<(), SendError<T>> {
        let mut inner = self.inner.lock().expect("channel lock poisoned");
        if inner.closed {
            return Err(SendError::Closed(value));
        }
        if !inner.can_accept() {
            return Err(SendError::Full(value));
        }
        inner.queue.push_back(value);
        inner.wake_one_receiver();
        Ok(())
    }

    /// Receives the next value, suspending while the channel is empty.
    ///
    /// After close: drains remaining items, then reports the close cause
    /// once (if any), then [`RecvError::Closed`].
    pub fn recv<'a>(&'a self, ctx: &'a JobContext) -> RecvFuture<'a, T> {
        RecvFuture {
            channel: self,
            ctx,
            registered: false,
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Result<T, RecvError> {
        let mut inner = self.inner.lock().expect("channel lock poisoned");
        if let Some(value) = inner.queue.pop_front() {
            inner.wake_one_sender();
            return Ok(value);
        }
        if inner.closed {
            if inner.cause.is_some() && !inner.cause_taken {
                inner.cause_taken = true;
                let cause = inner.cause.clone().unwrap_or_else(|| {
                    Error::new(crate::error::ErrorKind::ChannelClosed)
                });
                return Err(RecvError::Failed(cause));
            }
            return Err(RecvError::Closed);
        }
        Err(RecvError::Empty)
    }

    /// Closes the channel, optionally with a failure cause. Wakes every
    /// waiter. Idempotent: only the first close records the cause.
    pub fn close(&self, cause: Option<Error>) -> bool {
        let mut inner = self.inner.lock().expect("channel lock poisoned");
        if inner.closed {
            return false;
        }
        inner.closed = true;
        inner.cause = cause;
        inner.wake_everyone();
        true
    }

    /// Returns true once the channel is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("channel lock poisoned").closed
    }

    /// Number of buffered values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("channel lock poisoned").queue.len()
    }

    /// True when no values are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The lazy receive sequence: a stream of the channel's values ending
    /// when the channel is closed and drained (raising the close cause if
    /// one was recorded).
    #[must_use]
    pub fn stream(&self, ctx: &JobContext) -> ChannelStream<T> {
        ChannelStream {
            channel: self.clone(),
            ctx: ctx.clone(),
            registered: false,
            done: false,
        }
    }

    /// Adapts the channel into a cold [`Flow`] over its values.
    ///
    /// Collection is live against the shared buffer: two collections see
    /// disjoint values, not copies.
    #[must_use]
    pub fn as_flow(&self) -> Flow<T> {
        let channel = self.clone();
        Flow::from_factory(move |ctx| Box::pin(channel.stream(&ctx)))
    }
}

/// Future returned by [`Channel::send`].
#[must_use = "futures do nothing unless polled"]
pub struct SendFuture<'a, T> {
    channel: &'a Channel<T>,
    ctx: &'a JobContext,
    value: Option<T>,
}

impl<T> Unpin for SendFuture<'_, T> {}

impl<T: Send + 'static> Future for SendFuture<'_, T> {
    type Output = Result<(), SendError<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let value = this
            .value
            .take()
            .expect("send future polled after completion");

        if this.ctx.is_cancel_requested() {
            return Poll::Ready(Err(SendError::Cancelled(value)));
        }

        let mut inner = this.channel.inner.lock().expect("channel lock poisoned");
        if inner.closed {
            return Poll::Ready(Err(SendError::Closed(value)));
        }
        if inner.can_accept() {
            inner.queue.push_back(value);
            inner.wake_one_receiver();
            return Poll::Ready(Ok(()));
        }
        inner.send_wakers.push_back(cx.waker().clone());
        drop(inner);
        this.value = Some(value);
        this.ctx.job().register_cancellation_waker(cx.waker());
        Poll::Pending
    }
}

/// Future returned by [`Channel::recv`].
#[must_use = "futures do nothing unless polled"]
pub struct RecvFuture<'a, T> {
    channel: &'a Channel<T>,
    ctx: &'a JobContext,
    registered: bool,
}

impl<T: Send + 'static> Future for RecvFuture<'_, T> {
    type Output = Result<T, RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.ctx.is_cancel_requested() {
            this.unregister();
            return Poll::Ready(Err(RecvError::Cancelled));
        }

        let mut inner = this.channel.inner.lock().expect("channel lock poisoned");
        if let Some(value) = inner.queue.pop_front() {
            if this.registered {
                this.registered = false;
                inner.waiting_receivers -= 1;
            }
            inner.wake_one_sender();
            return Poll::Ready(Ok(value));
        }
        if inner.closed {
            if this.registered {
                this.registered = false;
                inner.waiting_receivers -= 1;
            }
            if inner.cause.is_some() && !inner.cause_taken {
                inner.cause_taken = true;
                let cause = inner.cause.clone().unwrap_or_else(|| {
                    Error::new(crate::error::ErrorKind::ChannelClosed)
                });
                return Poll::Ready(Err(RecvError::Failed(cause)));
            }
            return Poll::Ready(Err(RecvError::Closed));
        }
        if !this.registered {
            this.registered = true;
            inner.waiting_receivers += 1;
        }
        inner.recv_wakers.push_back(cx.waker().clone());
        // A parked receiver is what rendezvous senders wait for.
        inner.wake_one_sender();
        drop(inner);
        this.ctx.job().register_cancellation_waker(cx.waker());
        Poll::Pending
    }
}

impl<T> RecvFuture<'_, T> {
    fn unregister(&mut self) {
        if self.registered {
            self.registered = false;
            let mut inner = self.channel.inner.lock().expect("channel lock poisoned");
            inner.waiting_receivers -= 1;
        }
    }
}

impl<T> Drop for RecvFuture<'_, T> {
    fn drop(&mut self) {
        self.unregister();
    }
}

/// Stream over a channel's values; see [`Channel::stream`].
pub struct ChannelStream<T> {
    channel: Channel<T>,
    ctx: JobContext,
    registered: bool,
    done: bool,
}

impl<T> std::fmt::Debug for ChannelStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelStream")
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<T> ChannelStream<T> {
    fn unregister(&mut self) {
        if self.registered {
            self.registered = false;
            let mut inner = self.channel.inner.lock().expect("channel lock poisoned");
            inner.waiting_receivers -= 1;
        }
    }
}

impl<T> Drop for ChannelStream<T> {
    fn drop(&mut self) {
        self.unregister();
    }
}

impl<T: Send + 'static> FlowStream for ChannelStream<T> {
    type Item = crate::error::Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        if this.ctx.is_cancel_requested() {
            this.unregister();
            this.done = true;
            let reason = this.ctx.job().cancel_reason().unwrap_or_default();
            return Poll::Ready(Some(Err(Error::cancelled(&reason))));
        }

        let mut inner = this.channel.inner.lock().expect("channel lock poisoned");
        if let Some(value) = inner.queue.pop_front() {
            if this.registered {
                this.registered = false;
                inner.waiting_receivers -= 1;
            }
            inner.wake_one_sender();
            return Poll::Ready(Some(Ok(value)));
        }
        if inner.closed {
            if this.registered {
                this.registered = false;
                inner.waiting_receivers -= 1;
            }
            this.done = true;
            if inner.cause.is_some() && !inner.cause_taken {
                inner.cause_taken = true;
                let cause = inner.cause.clone().unwrap_or_else(|| {
                    Error::new(crate::error::ErrorKind::ChannelClosed)
                });
                return Poll::Ready(Some(Err(cause)));
            }
            return Poll::Ready(None);
        }
        if !this.registered {
            this.registered = true;
            inner.waiting_receivers += 1;
        }
        inner.recv_wakers.push_back(cx.waker().clone());
        inner.wake_one_sender();
        drop(inner);
        this.ctx.job().register_cancellation_waker(cx.waker());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_send_respects_capacity() {
        let channel = Channel::bounded(2);
        assert!(channel.try_send(1).is_ok());
        assert!(channel.try_send(2).is_ok());
        match channel.try_send(3) {
            Err(SendError::Full(3)) => {}
            other => unreachable!("expected full, got {other:?}"),
        }
        assert_eq!(channel.len(), 2);
    }

    #[test]
    fn try_send_on_closed_channel_fails() {
        let channel = Channel::unbounded();
        channel.close(None);
        match channel.try_send(7) {
            Err(SendError::Closed(7)) => {}
            other => unreachable!("expected closed, got {other:?}"),
        }
    }

    #[test]
    fn close_is_idempotent_and_first_cause_wins() {
        let channel: Channel<u32> = Channel::unbounded();
        assert!(channel.close(Some(Error::msg("first"))));
        assert!(!channel.close(Some(Error::msg("second"))));
        match channel.try_recv() {
            Err(RecvError::Failed(cause)) => assert_eq!(cause.context(), Some("first")),
            other => unreachable!("expected failure, got {other:?}"),
        }
        // Cause is observed exactly once.
        match channel.try_recv() {
            Err(RecvError::Closed) => {}
            other => unreachable!("expected closed, got {other:?}"),
        }
    }

    #[test]
    fn post_close_receivers_drain_remaining_items() {
        let channel = Channel::unbounded();
        channel.try_send(1).expect("open");
        channel.try_send(2).expect("open");
        channel.close(None);
        assert_eq!(channel.try_recv().ok(), Some(1));
        assert_eq!(channel.try_recv().ok(), Some(2));
        match channel.try_recv() {
            Err(RecvError::Closed) => {}
            other => unreachable!("expected closed, got {other:?}"),
        }
    }

    #[test]
    fn rendezvous_try_send_without_receiver_fails() {
        let channel = Channel::rendezvous();
        match channel.try_send(5) {
            Err(SendError::Full(5)) => {}
            other => unreachable!("expected full, got {other:?}"),
        }
    }

    #[test]
    fn fifo_order_is_preserved() {
        let channel = Channel::unbounded();
        for i in 0..5 {
            channel.try_send(i).expect("open");
        }
        let mut received = Vec::new();
        while let Ok(v) = channel.try_recv() {
            received.push(v);
        }
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
    }
}
