//! Scopes: the user entry point for launching structured work.
//!
//! A [`Scope`] binds a root [`Job`] to a [`Dispatch`] implementation and
//! exposes `launch` (fire-and-track), `spawn` (result-bearing), and
//! `with_context` (run-elsewhere-and-wait). Every submitted block runs
//! inside the same translation envelope:
//!
//! - return `Ok(())` → job `Completed`
//! - return a cancellation error → job `Cancelled`, nothing surfaced
//! - return any other error → job `Faulted`, failure reported to the
//!   uncaught-failure handler chain
//! - panic → caught, job `Faulted` with the payload, failure reported
//!
//! The envelope also maintains the scope's active-job counter and fires
//! the `JobStarted`/`JobCompleted` hooks the test harness observes.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use crate::context::JobContext;
use crate::deferred::{Deferred, ResultSlot};
use crate::dispatch::{default_dispatcher, Dispatch, TaskCell};
use crate::error::{Error, ErrorKind, Result};
use crate::job::{Job, JobPolicy};
use crate::observability::{FailureHandlers, ScopeTag};
use crate::time::{TimeSource, WallClock};
use crate::types::{CancelReason, JobId};

/// When a launched task first runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Start {
    /// Dispatch immediately on launch.
    #[default]
    Eager,
    /// Hold the task until [`Job::start`] (or the deferred's `start`/first
    /// await) triggers the first dispatch.
    Lazy,
}

/// Per-launch overrides.
#[derive(Default)]
pub struct LaunchOptions {
    /// Run on this dispatcher instead of the scope's.
    pub dispatcher: Option<Arc<dyn Dispatch>>,
    /// Eager or lazy start.
    pub start: Start,
}

impl LaunchOptions {
    /// Options selecting a dispatcher override.
    #[must_use]
    pub fn on(dispatcher: Arc<dyn Dispatch>) -> Self {
        Self {
            dispatcher: Some(dispatcher),
            start: Start::Eager,
        }
    }

    /// Options selecting a lazy start.
    #[must_use]
    pub fn lazy() -> Self {
        Self {
            dispatcher: None,
            start: Start::Lazy,
        }
    }
}

impl std::fmt::Debug for LaunchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchOptions")
            .field("dispatcher", &self.dispatcher.as_ref().map(|d| d.name().to_string()))
            .field("start", &self.start)
            .finish()
    }
}

type JobHook = Box<dyn Fn(JobId) + Send + Sync>;

/// Counter and event hooks shared with every task envelope.
pub(crate) struct ScopeShared {
    active: AtomicUsize,
    started_hooks: Mutex<Vec<JobHook>>,
    completed_hooks: Mutex<Vec<JobHook>>,
}

impl std::fmt::Debug for ScopeShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeShared")
            .field("active", &self.active.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ScopeShared {
    fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            started_hooks: Mutex::new(Vec::new()),
            completed_hooks: Mutex::new(Vec::new()),
        }
    }

    fn job_started(&self, id: JobId) {
        self.active.fetch_add(1, Ordering::AcqRel);
        let hooks = self.started_hooks.lock().expect("scope hooks lock poisoned");
        for hook in hooks.iter() {
            hook(id);
        }
    }

    fn job_completed(&self, id: JobId) {
        self.active.fetch_sub(1, Ordering::AcqRel);
        let hooks = self
            .completed_hooks
            .lock()
            .expect("scope hooks lock poisoned");
        for hook in hooks.iter() {
            hook(id);
        }
    }
}

/// Builder for a [`Scope`].
pub struct ScopeBuilder {
    name: String,
    dispatcher: Option<Arc<dyn Dispatch>>,
    time: Option<Arc<dyn TimeSource>>,
    handlers: Option<FailureHandlers>,
    policy: JobPolicy,
}

impl std::fmt::Debug for ScopeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeBuilder")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Default for ScopeBuilder {
    fn default() -> Self {
        Self {
            name: "scope".to_string(),
            dispatcher: None,
            time: None,
            handlers: None,
            policy: JobPolicy::FailFast,
        }
    }
}

impl ScopeBuilder {
    /// Sets the scope's display name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the dispatcher; defaults to the process pool.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatch>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Sets the time source; defaults to a wall clock.
    #[must_use]
    pub fn time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = Some(time);
        self
    }

    /// Sets the uncaught-failure handler chain; defaults to a fresh chain
    /// whose empty-tail behavior is a `tracing::error!` event.
    #[must_use]
    pub fn failure_handlers(mut self, handlers: FailureHandlers) -> Self {
        self.handlers = Some(handlers);
        self
    }

    /// Roots the scope at a supervisor job: children fail in isolation.
    #[must_use]
    pub fn supervisor(mut self) -> Self {
        self.policy = JobPolicy::Supervisor;
        self
    }

    /// Builds the scope.
    #[must_use]
    pub fn build(self) -> Scope {
        Scope {
            job: Job::root(self.policy),
            dispatcher: self.dispatcher.unwrap_or_else(default_dispatcher),
            time: self.time.unwrap_or_else(|| Arc::new(WallClock::new())),
            handlers: self.handlers.unwrap_or_default(),
            tag: Arc::new(ScopeTag::new(self.name)),
            disposed: AtomicBool::new(false),
            shared: Arc::new(ScopeShared::new()),
        }
    }
}

/// A root job plus a dispatcher: the home for structured work.
///
/// Disposal cancels the root job (and with it every launched child).
/// Launching on a disposed scope is a structural failure surfaced
/// immediately, not through any job.
#[derive(Debug)]
pub struct Scope {
    job: Job,
    dispatcher: Arc<dyn Dispatch>,
    time: Arc<dyn TimeSource>,
    handlers: FailureHandlers,
    tag: Arc<ScopeTag>,
    disposed: AtomicBool,
    shared: Arc<ScopeShared>,
}

impl Scope {
    /// Creates a scope over the given dispatcher with default ambient
    /// state.
    #[must_use]
    pub fn new(dispatcher: Arc<dyn Dispatch>) -> Self {
        Self::builder().dispatcher(dispatcher).build()
    }

    /// Returns a builder.
    #[must_use]
    pub fn builder() -> ScopeBuilder {
        ScopeBuilder::default()
    }

    /// Returns the scope's root job.
    #[must_use]
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Returns the scope's tag (name + id).
    #[must_use]
    pub fn tag(&self) -> &ScopeTag {
        &self.tag
    }

    /// Returns the scope's dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<dyn Dispatch> {
        &self.dispatcher
    }

    /// Returns a context bound to the scope's root job, for driving
    /// awaits from outside any launched task.
    #[must_use]
    pub fn context(&self) -> JobContext {
        JobContext::new(
            self.job.clone(),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.time),
            self.handlers.clone(),
            Arc::clone(&self.tag),
        )
    }

    /// Launches a fire-and-track task; the returned [`Job`] observes and
    /// controls it.
    pub fn launch<F, Fut>(&self, block: F) -> Result<Job>
    where
        F: FnOnce(JobContext) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.launch_with(LaunchOptions::default(), block)
    }

    /// As [`Scope::launch`] with per-launch options.
    pub fn launch_with<F, Fut>(&self, options: LaunchOptions, block: F) -> Result<Job>
    where
        F: FnOnce(JobContext) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (job, _slot) = self.submit::<(), _, _>(options, block, false)?;
        Ok(job)
    }

    /// Launches a result-bearing task.
    pub fn spawn<T, F, Fut>(&self, block: F) -> Result<Deferred<T>>
    where
        T: Send + 'static,
        F: FnOnce(JobContext) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.spawn_with(LaunchOptions::default(), block)
    }

    /// As [`Scope::spawn`] with per-launch options.
    pub fn spawn_with<T, F, Fut>(&self, options: LaunchOptions, block: F) -> Result<Deferred<T>>
    where
        T: Send + 'static,
        F: FnOnce(JobContext) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (job, slot) = self.submit(options, block, true)?;
        let slot = slot.unwrap_or_else(ResultSlot::new);
        Ok(Deferred::new(job, slot))
    }

    /// Runs `block` on `dispatcher` under a transient child job and
    /// suspends the caller until it finishes. Not fire-and-forget: the
    /// child's completion is joined here. Cancellation of the caller
    /// abandons the wait without detaching the child.
    pub async fn with_context<T, F, Fut>(
        &self,
        ctx: &JobContext,
        dispatcher: Arc<dyn Dispatch>,
        block: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(JobContext) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let deferred = self.spawn_with(LaunchOptions::on(dispatcher), block)?;
        deferred.join(ctx).await
    }

    fn submit<T, F, Fut>(
        &self,
        options: LaunchOptions,
        block: F,
        with_slot: bool,
    ) -> Result<(Job, Option<ResultSlot<T>>)>
    where
        T: Send + 'static,
        F: FnOnce(JobContext) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::ScopeDisposed).with_context(self.tag.to_string()));
        }

        // The child exists and is attached before the block's future is
        // even constructed, so cancellation racing the launch is observed.
        let job = Job::child_of(&self.job, JobPolicy::FailFast);
        let dispatcher = options.dispatcher.unwrap_or_else(|| Arc::clone(&self.dispatcher));
        let ctx = JobContext::new(
            job.clone(),
            Arc::clone(&dispatcher),
            Arc::clone(&self.time),
            self.handlers.clone(),
            Arc::clone(&self.tag),
        );

        let slot = with_slot.then(ResultSlot::new);
        let envelope = TaskEnvelope {
            job: job.clone(),
            ctx: ctx.clone(),
            shared: Arc::clone(&self.shared),
            future: Some(Box::pin(block(ctx))),
            slot: slot.clone(),
            started: false,
            finished: false,
        };
        let cell = TaskCell::new(envelope);

        match options.start {
            Start::Eager => dispatcher.dispatch(cell)?,
            Start::Lazy => {
                job.set_start_trigger(Box::new(move || {
                    if let Err(err) = dispatcher.dispatch(cell) {
                        tracing::warn!(error = %err, "lazy start failed; dispatcher stopped");
                    }
                }));
            }
        }

        Ok((job, slot))
    }

    /// Cancels the scope's root job and, through it, every launched task.
    pub fn cancel(&self) {
        self.job.cancel_with(CancelReason::user("scope cancelled"));
    }

    /// Disposes the scope: cancels the root job and rejects further
    /// launches. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.job.cancel_with(CancelReason::scope_disposed());
        tracing::debug!(scope = %self.tag, "scope disposed");
    }

    /// Returns true once the scope has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Waits for every current child of the root job to reach a terminal
    /// state. Child outcomes (cancelled, faulted) are not errors here;
    /// only cancellation of the caller fails the wait.
    pub async fn join_all(&self, ctx: &JobContext) -> Result<()> {
        for child in self.job.children() {
            if let Err(err) = child.join_with(ctx.job()).await {
                if ctx.job().is_cancel_requested() {
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// As [`Scope::join_all`], bounded by `duration`. Returns `Ok(false)`
    /// when the timeout elapsed with children still active.
    pub async fn join_all_timeout(&self, ctx: &JobContext, duration: Duration) -> Result<bool> {
        match ctx
            .timeout(duration, |inner| async move {
                for child in self.job.children() {
                    if let Err(err) = child.join_with(inner.job()).await {
                        if inner.job().is_cancel_requested() {
                            return Err(err);
                        }
                    }
                }
                Ok(())
            })
            .await
        {
            Ok(()) => Ok(true),
            Err(err) if err.is_timeout() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Number of tasks currently between their first poll and completion.
    #[must_use]
    pub fn active_jobs(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    /// True when no launched task is running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.active_jobs() == 0
    }

    /// Registers a hook fired when a task's first poll begins.
    pub fn on_job_started(&self, hook: impl Fn(JobId) + Send + Sync + 'static) {
        self.shared
            .started_hooks
            .lock()
            .expect("scope hooks lock poisoned")
            .push(Box::new(hook));
    }

    /// Registers a hook fired when a task finishes (any outcome).
    pub fn on_job_completed(&self, hook: impl Fn(JobId) + Send + Sync + 'static) {
        self.shared
            .completed_hooks
            .lock()
            .expect("scope hooks lock poisoned")
            .push(Box::new(hook));
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// The translation envelope around every user block.
struct TaskEnvelope<T> {
    job: Job,
    ctx: JobContext,
    shared: Arc<ScopeShared>,
    future: Option<Pin<Box<dyn Future<Output = Result<T>> + Send>>>,
    slot: Option<ResultSlot<T>>,
    started: bool,
    finished: bool,
}

impl<T> TaskEnvelope<T> {
    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.future = None;
        if self.started {
            self.shared.job_completed(self.job.id());
        }
    }
}

impl<T: Send + 'static> Future for TaskEnvelope<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(());
        }

        if !this.started {
            // Cancelled while queued: resolve without touching user code.
            if this.job.is_cancel_requested() {
                let reason = this.job.cancel_reason().unwrap_or_default();
                if let Some(slot) = &this.slot {
                    slot.resolve(Err(Error::cancelled(&reason)));
                }
                this.started = true;
                this.shared.job_started(this.job.id());
                this.finish();
                return Poll::Ready(());
            }
            this.started = true;
            this.shared.job_started(this.job.id());
        }

        let Some(future) = this.future.as_mut() else {
            this.finish();
            return Poll::Ready(());
        };

        let poll = catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(cx)));
        match poll {
            Err(payload) => {
                let error = Error::panic(payload.as_ref());
                if let Some(slot) = &this.slot {
                    slot.resolve(Err(error.clone()));
                }
                this.job.fault(error.clone());
                this.ctx.report_failure(&error);
                this.finish();
                Poll::Ready(())
            }
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(Ok(value))) => {
                if let Some(slot) = &this.slot {
                    slot.resolve(Ok(value));
                }
                this.job.complete();
                this.finish();
                Poll::Ready(())
            }
            Ok(Poll::Ready(Err(error))) if error.is_cancelled() => {
                if let Some(slot) = &this.slot {
                    slot.resolve(Err(error));
                }
                // Keeps the original reason when cancellation already
                // reached the job through the tree.
                this.job.cancel();
                this.finish();
                Poll::Ready(())
            }
            Ok(Poll::Ready(Err(error))) => {
                if let Some(slot) = &this.slot {
                    slot.resolve(Err(error.clone()));
                }
                this.job.fault(error.clone());
                this.ctx.report_failure(&error);
                this.finish();
                Poll::Ready(())
            }
        }
    }
}

impl<T> Drop for TaskEnvelope<T> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Dropped without completing: the dispatcher discarded the task
        // (shutdown, cleared harness queue). The job must still terminate.
        self.job
            .cancel_with(CancelReason::user("task discarded by dispatcher"));
        if let Some(slot) = &self.slot {
            let reason = self.job.cancel_reason().unwrap_or_default();
            slot.resolve(Err(Error::cancelled(&reason)));
        }
        if self.started {
            self.shared.job_completed(self.job.id());
        }
        self.finished = true;
    }
}
