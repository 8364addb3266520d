//! Time sources, sleeping, and timed races.
//!
//! All waiting in the crate goes through a [`TimeSource`]: a monotonic
//! [`WallClock`] under real execution, the virtual clock from
//! [`crate::testing`] under the harness. Code never reads the OS clock
//! directly, which is what makes `delay`-style waits testable without real
//! waiting.

mod wall;

pub use wall::WallClock;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use crate::context::JobContext;
use crate::error::{Error, Result};
use crate::job::Job;
use crate::types::{CancelReason, Time};

/// A source of logical time plus deadline wakeups.
pub trait TimeSource: Send + Sync + std::fmt::Debug {
    /// Returns the current logical time.
    fn now(&self) -> Time;

    /// Arranges for `waker` to be woken once `deadline` is reached.
    ///
    /// A deadline at or before `now` must wake immediately. Registrations
    /// are one-shot; pollers re-register on every poll.
    fn register(&self, deadline: Time, waker: &Waker);
}

/// A future that completes once its deadline has passed.
///
/// When bound to a job, a cancellation request resumes the sleeper early
/// with a cancellation error: every suspension point is cancellable.
/// Dropping a `Sleep` has no side effects.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Sleep {
    deadline: Time,
    source: Arc<dyn TimeSource>,
    job: Option<Job>,
}

impl Sleep {
    /// Creates a sleep completing at the given absolute deadline.
    pub fn until(source: Arc<dyn TimeSource>, deadline: Time, job: Option<Job>) -> Self {
        Self {
            deadline,
            source,
            job,
        }
    }

    /// Creates a sleep completing after `duration` from the source's now.
    pub fn after(source: Arc<dyn TimeSource>, duration: Duration, job: Option<Job>) -> Self {
        let deadline = source.now() + duration;
        Self::until(source, deadline, job)
    }

    /// Returns the absolute deadline.
    #[must_use]
    pub const fn deadline(&self) -> Time {
        self.deadline
    }
}

impl Future for Sleep {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(job) = &self.job {
            if job.is_cancel_requested() {
                let reason = job.cancel_reason().unwrap_or_default();
                return Poll::Ready(Err(Error::cancelled(&reason)));
            }
        }
        if self.source.now() >= self.deadline {
            return Poll::Ready(Ok(()));
        }
        self.source.register(self.deadline, cx.waker());
        if let Some(job) = &self.job {
            job.register_cancellation_waker(cx.waker());
            if job.is_cancel_requested() {
                let reason = job.cancel_reason().unwrap_or_default();
                return Poll::Ready(Err(Error::cancelled(&reason)));
            }
        }
        Poll::Pending
    }
}

/// Yields once to the dispatcher, letting other queued tasks run.
#[derive(Debug, Default)]
#[must_use = "futures do nothing unless polled"]
pub struct YieldNow {
    yielded: bool,
}

impl YieldNow {
    /// Creates a yield point.
    #[must_use]
    pub const fn new() -> Self {
        Self { yielded: false }
    }
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Races `op` against a deadline on a private child token.
///
/// The operation receives a context bound to the token: if the deadline
/// wins, the token is cancelled and the operation is expected to observe
/// that at its next suspension point, at which point the race resolves
/// with a timeout error. The token's termination never propagates to the
/// caller's job; cancellation of the caller still flows down into it.
pub async fn with_timeout<T, F, Fut>(ctx: &JobContext, duration: Duration, op: F) -> Result<T>
where
    F: FnOnce(JobContext) -> Fut,
    Fut: Future<Output = Result<T>> + Send,
{
    let token = Job::token_of(ctx.job());
    let inner = ctx.with_job(token.clone());
    let op_future = op(inner);
    let sleep = Sleep::after(
        Arc::clone(ctx.time()),
        duration,
        Some(ctx.job().clone()),
    );

    TimeoutRace {
        op: Box::pin(op_future),
        sleep,
        token,
        timed_out: false,
    }
    .await
}

struct TimeoutRace<'a, T> {
    op: Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>,
    sleep: Sleep,
    token: Job,
    timed_out: bool,
}

impl<T> Future for TimeoutRace<'_, T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if !this.timed_out {
            match Pin::new(&mut this.sleep).poll(cx) {
                Poll::Ready(Ok(())) => {
                    this.timed_out = true;
                    this.token.cancel_with(CancelReason::timeout());
                }
                Poll::Ready(Err(err)) => {
                    // The caller's own job was cancelled; the token is
                    // already cancelled through the tree.
                    return Poll::Ready(Err(err));
                }
                Poll::Pending => {}
            }
        }

        match this.op.as_mut().poll(cx) {
            Poll::Ready(Ok(value)) => {
                if this.timed_out {
                    Poll::Ready(Err(Error::timeout()))
                } else {
                    this.token.complete();
                    Poll::Ready(Ok(value))
                }
            }
            Poll::Ready(Err(err)) => {
                if this.timed_out && err.is_cancelled() {
                    Poll::Ready(Err(Error::timeout()))
                } else {
                    this.token.complete();
                    Poll::Ready(Err(err))
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
