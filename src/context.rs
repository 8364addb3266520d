//! The per-task context.
//!
//! A [`JobContext`] is handed to every user block. It carries the block's
//! [`Job`] (the cancellation signal), the dispatcher the block runs on,
//! the ambient time source, the uncaught-failure handler chain, and the
//! owning scope's tag. Threading these through an explicit context keeps
//! all effects observable: the virtual-time harness swaps the time source
//! by constructing scopes over its own clock, not by mutating globals.

use std::sync::Arc;
use std::time::Duration;

use crate::dispatch::Dispatch;
use crate::error::{Error, Result};
use crate::job::{Cancelled, Job};
use crate::observability::{FailureHandlers, ScopeTag};
use crate::time::{with_timeout, Sleep, TimeSource, YieldNow};
use crate::types::Time;

/// Capabilities available to a running task.
///
/// Cheap to clone; clones share the same job and ambient state.
#[derive(Clone, Debug)]
pub struct JobContext {
    job: Job,
    dispatcher: Arc<dyn Dispatch>,
    time: Arc<dyn TimeSource>,
    handlers: FailureHandlers,
    tag: Arc<ScopeTag>,
}

impl JobContext {
    pub(crate) fn new(
        job: Job,
        dispatcher: Arc<dyn Dispatch>,
        time: Arc<dyn TimeSource>,
        handlers: FailureHandlers,
        tag: Arc<ScopeTag>,
    ) -> Self {
        Self {
            job,
            dispatcher,
            time,
            handlers,
            tag,
        }
    }

    /// Returns the job this context is bound to.
    #[must_use]
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Returns the dispatcher this task was submitted to.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<dyn Dispatch> {
        &self.dispatcher
    }

    /// Returns the ambient time source.
    #[must_use]
    pub fn time(&self) -> &Arc<dyn TimeSource> {
        &self.time
    }

    /// Returns the current logical time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.time.now()
    }

    /// Returns the owning scope's tag.
    #[must_use]
    pub fn tag(&self) -> &ScopeTag {
        &self.tag
    }

    /// Returns the uncaught-failure handler chain.
    #[must_use]
    pub fn failure_handlers(&self) -> &FailureHandlers {
        &self.handlers
    }

    /// Fails with a cancellation error if this task's job is not active.
    pub fn ensure_active(&self) -> Result<()> {
        self.job.ensure_active()
    }

    /// Returns true if cooperative code should stop.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.job.is_cancel_requested()
    }

    /// Resolves once cancellation has been requested for this task's job.
    #[must_use]
    pub fn cancelled(&self) -> Cancelled<'_> {
        self.job.cancelled()
    }

    /// Suspends for `duration` in the ambient time source.
    ///
    /// A zero or negative-equivalent duration resolves in the current
    /// step. The wait is cancellable: a cancellation request resumes it
    /// early with a cancellation error.
    pub fn sleep(&self, duration: Duration) -> Sleep {
        Sleep::after(Arc::clone(&self.time), duration, Some(self.job.clone()))
    }

    /// Yields once to the dispatcher.
    pub fn yield_now(&self) -> YieldNow {
        YieldNow::new()
    }

    /// Races `op` against `duration` on a private child token; see
    /// [`with_timeout`].
    pub async fn timeout<T, F, Fut>(&self, duration: Duration, op: F) -> Result<T>
    where
        F: FnOnce(JobContext) -> Fut,
        Fut: std::future::Future<Output = Result<T>> + Send,
    {
        with_timeout(self, duration, op).await
    }

    /// Waits for `job` to reach a terminal state, giving up after
    /// `duration` with a timeout error. The target job is unaffected by
    /// the timeout.
    pub async fn join_timeout(&self, job: &Job, duration: Duration) -> Result<()> {
        let target = job.clone();
        self.timeout(duration, |ctx| async move {
            target.join_with(ctx.job()).await
        })
        .await
    }

    /// Routes a failure to the uncaught-failure handler chain.
    pub fn report_failure(&self, error: &Error) {
        self.handlers.report(Some(&self.tag), error);
    }

    /// Rebinds this context to a different job, keeping the ambient state.
    #[must_use]
    pub(crate) fn with_job(&self, job: Job) -> Self {
        Self {
            job,
            dispatcher: Arc::clone(&self.dispatcher),
            time: Arc::clone(&self.time),
            handlers: self.handlers.clone(),
            tag: Arc::clone(&self.tag),
        }
    }
}
