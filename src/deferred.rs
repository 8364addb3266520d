//! Result-bearing handles for scope-spawned tasks.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use crate::context::JobContext;
use crate::error::{Error, Result};
use crate::job::Job;
use crate::types::CancelReason;

struct SlotInner<T> {
    value: Option<Result<T>>,
    taken: bool,
    wakers: Vec<Waker>,
}

/// One-shot result slot shared between the task envelope and the handle.
pub(crate) struct ResultSlot<T> {
    inner: Arc<Mutex<SlotInner<T>>>,
}

impl<T> Clone for ResultSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for ResultSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("result slot lock poisoned");
        f.debug_struct("ResultSlot")
            .field("ready", &inner.value.is_some())
            .field("taken", &inner.taken)
            .finish()
    }
}

impl<T> ResultSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SlotInner {
                value: None,
                taken: false,
                wakers: Vec::new(),
            })),
        }
    }

    /// Stores the result if the slot is still empty; the first resolution
    /// wins. Wakes all waiters either way the first time.
    pub(crate) fn resolve(&self, result: Result<T>) {
        let wakers = {
            let mut inner = self.inner.lock().expect("result slot lock poisoned");
            if inner.value.is_some() || inner.taken {
                return;
            }
            inner.value = Some(result);
            std::mem::take(&mut inner.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }

    fn take(&self) -> Option<Result<T>> {
        let mut inner = self.inner.lock().expect("result slot lock poisoned");
        let value = inner.value.take();
        if value.is_some() {
            inner.taken = true;
        }
        value
    }

    fn is_ready(&self) -> bool {
        self.inner
            .lock()
            .expect("result slot lock poisoned")
            .value
            .is_some()
    }

    fn is_taken(&self) -> bool {
        self.inner.lock().expect("result slot lock poisoned").taken
    }

    fn register(&self, waker: &Waker) {
        let mut inner = self.inner.lock().expect("result slot lock poisoned");
        if inner.value.is_some() {
            waker.wake_by_ref();
            return;
        }
        inner.wakers.push(waker.clone());
    }
}

/// A future-like handle for a result-bearing task.
///
/// Backed by a [`Job`]: cancelling the deferred cancels the job, and the
/// job's terminal state always resolves the result slot, even for a lazy
/// task that is cancelled before it ever starts.
#[derive(Debug)]
pub struct Deferred<T> {
    job: Job,
    slot: ResultSlot<T>,
}

impl<T: Send + 'static> Deferred<T> {
    pub(crate) fn new(job: Job, slot: ResultSlot<T>) -> Self {
        // Fallback resolution: if the job terminates without the envelope
        // ever resolving the slot (lazy task cancelled before start), the
        // handle still observes the terminal state.
        {
            let slot = slot.clone();
            let job_for_handler = job.clone();
            job.on_completion(move |state| {
                use crate::job::JobState;
                match state {
                    JobState::Cancelled => {
                        let reason = job_for_handler.cancel_reason().unwrap_or_default();
                        slot.resolve(Err(Error::cancelled(&reason)));
                    }
                    JobState::Faulted => {
                        let failure = job_for_handler
                            .failure()
                            .unwrap_or_else(|| Error::msg("faulted without recorded error"));
                        slot.resolve(Err(failure));
                    }
                    JobState::Completed | JobState::Active => {}
                }
            });
        }
        Self { job, slot }
    }

    /// Returns the underlying job.
    #[must_use]
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Starts a lazily spawned task. A no-op after the first call and for
    /// eagerly started tasks.
    pub fn start(&self) -> bool {
        self.job.start()
    }

    /// Cancels the underlying job.
    pub fn cancel(&self) -> bool {
        self.job.cancel()
    }

    /// Cancels the underlying job with an explicit reason.
    pub fn cancel_with(&self, reason: CancelReason) -> bool {
        self.job.cancel_with(reason)
    }

    /// Peeks at the failure without consuming the result.
    #[must_use]
    pub fn failure(&self) -> Option<Error> {
        self.job.failure()
    }

    /// Non-blocking result access: `Some` only once the value (or failure)
    /// is available. Consumes the value on success; the result of a
    /// deferred can be taken exactly once.
    pub fn try_result(&self) -> Option<Result<T>> {
        self.slot.take()
    }

    /// Suspends until the result is available, starting a lazy task on
    /// first await. Failure re-raises the task's error; cancellation
    /// re-raises as a cancellation error. Cancellation of the *caller*
    /// fails the wait without affecting this task.
    pub fn join<'a>(&'a self, ctx: &'a JobContext) -> DeferredJoin<'a, T> {
        self.start();
        DeferredJoin {
            deferred: self,
            caller: ctx.job(),
        }
    }

    /// As [`Deferred::join`], but gives up after `duration` with a timeout
    /// error. On timeout the task keeps running and the result stays
    /// claimable.
    pub async fn join_timeout(&self, ctx: &JobContext, duration: Duration) -> Result<T> {
        self.start();
        ctx.timeout(duration, |inner| async move {
            DeferredJoin {
                deferred: self,
                caller: inner.job(),
            }
            .await
        })
        .await
    }
}

/// Future returned by [`Deferred::join`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct DeferredJoin<'a, T> {
    deferred: &'a Deferred<T>,
    caller: &'a Job,
}

impl<T: Send + 'static> Future for DeferredJoin<'_, T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(result) = self.deferred.slot.take() {
            return Poll::Ready(result);
        }
        if self.deferred.slot.is_taken() {
            return Poll::Ready(Err(Error::msg("deferred result already consumed")));
        }
        if self.caller.is_cancel_requested() {
            let reason = self.caller.cancel_reason().unwrap_or_default();
            return Poll::Ready(Err(
                Error::cancelled(&reason).with_context("await abandoned")
            ));
        }
        self.deferred.slot.register(cx.waker());
        self.caller.register_cancellation_waker(cx.waker());
        if let Some(result) = self.deferred.slot.take() {
            return Poll::Ready(result);
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobPolicy;

    #[test]
    fn slot_first_resolution_wins() {
        let slot: ResultSlot<u32> = ResultSlot::new();
        slot.resolve(Ok(1));
        slot.resolve(Ok(2));
        match slot.take() {
            Some(Ok(v)) => assert_eq!(v, 1),
            other => unreachable!("expected first value, got {other:?}"),
        }
    }

    #[test]
    fn slot_value_is_taken_once() {
        let slot: ResultSlot<u32> = ResultSlot::new();
        slot.resolve(Ok(9));
        assert!(slot.take().is_some());
        assert!(slot.take().is_none());
        assert!(slot.is_taken());
        // Resolving after the take must not resurrect a value.
        slot.resolve(Ok(10));
        assert!(!slot.is_ready());
    }

    #[test]
    fn job_cancellation_resolves_an_unresolved_slot() {
        let job = Job::root(JobPolicy::FailFast);
        let deferred: Deferred<u32> = Deferred::new(job.clone(), ResultSlot::new());
        job.cancel_with(CancelReason::user("never started"));
        match deferred.try_result() {
            Some(Err(e)) => assert!(e.is_cancelled()),
            other => unreachable!("expected cancellation, got {other:?}"),
        }
    }

    #[test]
    fn failure_peek_does_not_consume() {
        let job = Job::root(JobPolicy::FailFast);
        let deferred: Deferred<u32> = Deferred::new(job.clone(), ResultSlot::new());
        job.fault(Error::msg("boom"));
        assert!(deferred.failure().is_some());
        assert!(deferred.failure().is_some());
        match deferred.try_result() {
            Some(Err(e)) => assert_eq!(e.context(), Some("boom")),
            other => unreachable!("expected failure, got {other:?}"),
        }
    }
}
