//! The job tree and cancellation protocol.
//!
//! A [`Job`] is a node in a tree of cancellable work. Lifetimes are
//! hierarchically bound: cancellation flows down the tree, completion and
//! failure flow up it. The state machine is a single atomic word:
//!
//! ```text
//!        ┌──────────→ Completed  (terminal)
//! Active ┼──────────→ Cancelled  (terminal)
//!        └──────────→ Faulted    (terminal)
//! ```
//!
//! Transitions happen through one compare-and-swap; only the winner runs
//! side effects (child cancellation, parent notification, signal fan-out).
//! Terminal states are sticky: `cancel` on a completed job is a no-op and
//! the first cancellation reason wins.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll, Waker};

use crate::error::{Error, Result};
use crate::types::{CancelReason, JobId};

const ACTIVE: u32 = 0;
const COMPLETED: u32 = 1;
const CANCELLED: u32 = 2;
const FAULTED: u32 = 3;

/// The four mutually exclusive job states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// The job is running or eligible to run.
    Active,
    /// The user block returned normally.
    Completed,
    /// The job was cancelled before completing.
    Cancelled,
    /// The user block failed or panicked.
    Faulted,
}

impl JobState {
    const fn from_word(word: u32) -> Self {
        match word {
            COMPLETED => Self::Completed,
            CANCELLED => Self::Cancelled,
            FAULTED => Self::Faulted,
            _ => Self::Active,
        }
    }

    /// Returns true for any non-`Active` state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Faulted => write!(f, "faulted"),
        }
    }
}

/// How a job reacts to the termination of one of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobPolicy {
    /// Structured-concurrency default: a child's cancellation cancels the
    /// parent, and a child's failure faults the parent (which cancels the
    /// remaining siblings).
    #[default]
    FailFast,
    /// Children fail in isolation: the parent observes child termination
    /// but neither cancels itself nor its other children.
    Supervisor,
}

type CompletionHandler = Box<dyn FnOnce(JobState) + Send>;

#[derive(Default)]
struct JobWaiters {
    completion: Vec<Waker>,
    cancellation: Vec<Waker>,
    handlers: Vec<CompletionHandler>,
}

#[derive(Default)]
struct TerminalInfo {
    reason: Option<CancelReason>,
    failure: Option<Error>,
}

pub(crate) struct JobInner {
    id: JobId,
    parent: Option<Weak<JobInner>>,
    /// Private tokens (timeout races) participate in downward cancellation
    /// but never notify the parent of their own termination.
    propagate_to_parent: bool,
    policy: JobPolicy,
    state: AtomicU32,
    terminal: Mutex<TerminalInfo>,
    children: Mutex<Vec<Weak<JobInner>>>,
    waiters: Mutex<JobWaiters>,
    start_trigger: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl std::fmt::Debug for JobInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobInner")
            .field("id", &self.id)
            .field("state", &JobState::from_word(self.state.load(Ordering::Acquire)))
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// A node in the cancellation tree.
///
/// `Job` is a cheaply clonable handle; clones share the same node. Dropping
/// every handle to an active job does not cancel it; ownership of the
/// lifecycle stays with the tree, not with the handles.
#[derive(Clone, Debug)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Job {}

impl Job {
    fn new(parent: Option<&Job>, policy: JobPolicy, propagate_to_parent: bool) -> Self {
        Self {
            inner: Arc::new(JobInner {
                id: JobId::next(),
                parent: parent.map(|p| Arc::downgrade(&p.inner)),
                propagate_to_parent,
                policy,
                state: AtomicU32::new(ACTIVE),
                terminal: Mutex::new(TerminalInfo::default()),
                children: Mutex::new(Vec::new()),
                waiters: Mutex::new(JobWaiters::default()),
                start_trigger: Mutex::new(None),
            }),
        }
    }

    /// Creates a parentless root job.
    #[must_use]
    pub fn root(policy: JobPolicy) -> Self {
        Self::new(None, policy, false)
    }

    /// Creates a child job attached to `parent`.
    ///
    /// The child is created and attached before any work runs under it, so
    /// a cancellation racing with the attachment is observed: attaching to
    /// an already-cancelled parent cancels the child immediately.
    #[must_use]
    pub fn child_of(parent: &Job, policy: JobPolicy) -> Self {
        let child = Self::new(Some(parent), policy, true);
        parent.attach_child(&child);
        child
    }

    /// Creates a non-propagating child token.
    ///
    /// The token is cancelled when the parent is cancelled, but its own
    /// termination is invisible to the parent. Used for the private race
    /// token inside timed operations.
    #[must_use]
    pub(crate) fn token_of(parent: &Job) -> Self {
        let token = Self::new(Some(parent), JobPolicy::FailFast, false);
        parent.attach_child(&token);
        token
    }

    fn attach_child(&self, child: &Job) {
        self.inner
            .children
            .lock()
            .expect("job children lock poisoned")
            .push(Arc::downgrade(&child.inner));
        if self.is_cancel_requested() {
            child.cancel_with(CancelReason::parent_cancelled());
        }
    }

    /// Returns this job's identifier.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.inner.id
    }

    /// Returns this job's child-termination policy.
    #[must_use]
    pub fn policy(&self) -> JobPolicy {
        self.inner.policy
    }

    /// Returns the parent job, if it is still alive.
    #[must_use]
    pub fn parent(&self) -> Option<Job> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Job { inner })
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> JobState {
        JobState::from_word(self.inner.state.load(Ordering::Acquire))
    }

    /// Returns true while the job has not reached a terminal state.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == JobState::Active
    }

    /// Returns true once the job completed normally.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state() == JobState::Completed
    }

    /// Returns true once the job was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state() == JobState::Cancelled
    }

    /// Returns true once the job faulted.
    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.state() == JobState::Faulted
    }

    /// Returns true if cooperative code under this job should stop.
    ///
    /// Both `Cancelled` and `Faulted` count: a faulted subtree has no
    /// business continuing its siblings' work.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        matches!(self.state(), JobState::Cancelled | JobState::Faulted)
    }

    /// Returns the recorded cancellation reason, if the job was cancelled.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.inner
            .terminal
            .lock()
            .expect("job terminal lock poisoned")
            .reason
            .clone()
    }

    /// Returns the captured failure, if the job faulted.
    #[must_use]
    pub fn failure(&self) -> Option<Error> {
        self.inner
            .terminal
            .lock()
            .expect("job terminal lock poisoned")
            .failure
            .clone()
    }

    /// Fails with a cancellation error if the job is not `Active`.
    pub fn ensure_active(&self) -> Result<()> {
        match self.state() {
            JobState::Active => Ok(()),
            JobState::Cancelled => {
                let reason = self.cancel_reason().unwrap_or_default();
                Err(Error::cancelled(&reason))
            }
            JobState::Faulted => Err(Error::cancelled(&CancelReason::sibling_failed())
                .with_context("job faulted")),
            JobState::Completed => Err(Error::cancelled(&CancelReason::default())
                .with_context("job already completed")),
        }
    }

    /// Requests cancellation with a default user reason.
    ///
    /// Returns true if this call performed the transition.
    pub fn cancel(&self) -> bool {
        self.cancel_with(CancelReason::default())
    }

    /// Requests cancellation with an explicit reason.
    ///
    /// Idempotent: on an already-terminal job this is a no-op and the
    /// first recorded reason is retained.
    pub fn cancel_with(&self, reason: CancelReason) -> bool {
        self.transition(CANCELLED, Some(reason), None)
    }

    /// Marks the job completed. Called by the task envelope when the user
    /// block returns normally.
    pub(crate) fn complete(&self) -> bool {
        self.transition(COMPLETED, None, None)
    }

    /// Marks the job faulted with the given error. Later failures are
    /// dropped; the first one wins.
    pub(crate) fn fault(&self, error: Error) -> bool {
        self.transition(FAULTED, None, Some(error))
    }

    fn transition(&self, target: u32, reason: Option<CancelReason>, failure: Option<Error>) -> bool {
        {
            let mut terminal = self
                .inner
                .terminal
                .lock()
                .expect("job terminal lock poisoned");
            if self
                .inner
                .state
                .compare_exchange(ACTIVE, target, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return false;
            }
            terminal.reason = reason;
            terminal.failure = failure;
        }
        self.after_transition(target);
        true
    }

    /// Side effects of the winning transition. Runs without any of this
    /// job's locks held.
    fn after_transition(&self, target: u32) {
        let state = JobState::from_word(target);
        tracing::debug!(job = %self.inner.id, state = %state, "job reached terminal state");

        // Cancellation flows down first: parent state is already terminal,
        // then the subtree is cancelled in depth order.
        if state != JobState::Completed {
            let child_reason = if state == JobState::Cancelled {
                CancelReason::parent_cancelled()
            } else {
                CancelReason::sibling_failed()
            };
            for child in self.children() {
                child.cancel_with(child_reason.clone());
            }
        }

        if let Some(parent) = self.parent() {
            if self.inner.propagate_to_parent {
                match state {
                    JobState::Cancelled => parent.handle_child_cancellation(self),
                    JobState::Faulted => {
                        let failure = self
                            .failure()
                            .unwrap_or_else(|| Error::msg("faulted without recorded error"));
                        parent.handle_child_failure(self, failure);
                    }
                    _ => {}
                }
            }
            parent.prune_child(self.inner.id);
        }

        let (completion, cancellation, handlers) = {
            let mut waiters = self
                .inner
                .waiters
                .lock()
                .expect("job waiters lock poisoned");
            (
                std::mem::take(&mut waiters.completion),
                std::mem::take(&mut waiters.cancellation),
                std::mem::take(&mut waiters.handlers),
            )
        };
        for waker in completion {
            waker.wake();
        }
        if state != JobState::Completed {
            for waker in cancellation {
                waker.wake();
            }
        }
        for handler in handlers {
            Self::run_handler(handler, state);
        }

        // The lazy-start trigger of a job that terminated before starting
        // will never be invoked; drop it (outside the lock) so it cannot
        // leak the task.
        let trigger = self
            .inner
            .start_trigger
            .lock()
            .expect("job start lock poisoned")
            .take();
        drop(trigger);
    }

    /// Child-cancellation hook.
    fn handle_child_cancellation(&self, child: &Job) {
        match self.inner.policy {
            JobPolicy::FailFast => {
                self.cancel_with(CancelReason::child_cancelled());
            }
            JobPolicy::Supervisor => {
                tracing::debug!(
                    supervisor = %self.inner.id,
                    child = %child.id(),
                    "supervised child cancelled; siblings unaffected"
                );
            }
        }
    }

    /// Child-failure hook.
    fn handle_child_failure(&self, child: &Job, failure: Error) {
        match self.inner.policy {
            JobPolicy::FailFast => {
                self.fault(failure);
            }
            JobPolicy::Supervisor => {
                tracing::debug!(
                    supervisor = %self.inner.id,
                    child = %child.id(),
                    error = %failure,
                    "supervised child faulted; siblings unaffected"
                );
            }
        }
    }

    fn prune_child(&self, id: JobId) {
        self.inner
            .children
            .lock()
            .expect("job children lock poisoned")
            .retain(|weak| weak.upgrade().is_some_and(|child| child.id != id));
    }

    /// Returns a stable snapshot of the current children.
    #[must_use]
    pub fn children(&self) -> Vec<Job> {
        self.inner
            .children
            .lock()
            .expect("job children lock poisoned")
            .iter()
            .filter_map(Weak::upgrade)
            .map(|inner| Job { inner })
            .collect()
    }

    /// Registers a one-shot completion handler.
    ///
    /// If the job is already terminal the handler runs immediately on the
    /// calling thread. Handler panics are swallowed.
    pub fn on_completion(&self, handler: impl FnOnce(JobState) + Send + 'static) {
        let mut pending = Some(Box::new(handler) as CompletionHandler);
        {
            let mut waiters = self
                .inner
                .waiters
                .lock()
                .expect("job waiters lock poisoned");
            // State must be read under the lock: the winning transition
            // drains handlers while holding it, so a push after that drain
            // would be lost.
            if !self.state().is_terminal() {
                if let Some(handler) = pending.take() {
                    waiters.handlers.push(handler);
                }
            }
        }
        if let Some(handler) = pending {
            Self::run_handler(handler, self.state());
        }
    }

    fn run_handler(handler: CompletionHandler, state: JobState) {
        if catch_unwind(AssertUnwindSafe(|| handler(state))).is_err() {
            tracing::warn!("job completion handler panicked; swallowed");
        }
    }

    /// Suspends until the job reaches a terminal state, then reports the
    /// outcome: `Ok(())` for completion, a cancellation error for
    /// cancellation, and a clone of the stored failure for a fault.
    #[must_use]
    pub fn join(&self) -> Join<'_> {
        Join {
            job: self,
            caller: None,
        }
    }

    /// As [`Job::join`], but the wait itself fails with a cancellation
    /// error when `caller` is cancelled, without affecting this job.
    #[must_use]
    pub fn join_with<'a>(&'a self, caller: &'a Job) -> Join<'a> {
        Join {
            job: self,
            caller: Some(caller),
        }
    }

    /// Resolves once cancellation has been requested for this job.
    #[must_use]
    pub fn cancelled(&self) -> Cancelled<'_> {
        Cancelled { job: self }
    }

    pub(crate) fn register_completion_waker(&self, waker: &Waker) {
        let mut waiters = self
            .inner
            .waiters
            .lock()
            .expect("job waiters lock poisoned");
        if self.state().is_terminal() {
            waker.wake_by_ref();
            return;
        }
        waiters.completion.push(waker.clone());
    }

    pub(crate) fn register_cancellation_waker(&self, waker: &Waker) {
        let mut waiters = self
            .inner
            .waiters
            .lock()
            .expect("job waiters lock poisoned");
        if self.is_cancel_requested() {
            waker.wake_by_ref();
            return;
        }
        waiters.cancellation.push(waker.clone());
    }

    /// Installs the deferred dispatch action for a lazily started job.
    pub(crate) fn set_start_trigger(&self, trigger: Box<dyn FnOnce() + Send>) {
        let mut slot = self
            .inner
            .start_trigger
            .lock()
            .expect("job start lock poisoned");
        debug_assert!(slot.is_none(), "start trigger installed twice");
        *slot = Some(trigger);
    }

    /// Starts a lazily launched job.
    ///
    /// Returns true if this call performed the first dispatch; later calls
    /// (and calls on eagerly started or terminal jobs) are no-ops.
    pub fn start(&self) -> bool {
        let trigger = self
            .inner
            .start_trigger
            .lock()
            .expect("job start lock poisoned")
            .take();
        match trigger {
            Some(trigger) if !self.is_cancel_requested() => {
                trigger();
                true
            }
            _ => false,
        }
    }

    /// Maps the terminal state onto the join outcome.
    fn terminal_outcome(&self) -> Result<()> {
        match self.state() {
            JobState::Completed => Ok(()),
            JobState::Cancelled => {
                let reason = self.cancel_reason().unwrap_or_default();
                Err(Error::cancelled(&reason))
            }
            JobState::Faulted => Err(self
                .failure()
                .unwrap_or_else(|| Error::msg("faulted without recorded error"))),
            JobState::Active => unreachable!("terminal_outcome on an active job"),
        }
    }
}

/// Future returned by [`Job::join`] / [`Job::join_with`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Join<'a> {
    job: &'a Job,
    caller: Option<&'a Job>,
}

impl Future for Join<'_> {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(caller) = self.caller {
            if caller.is_cancel_requested() {
                let reason = caller.cancel_reason().unwrap_or_default();
                return Poll::Ready(Err(Error::cancelled(&reason).with_context("join abandoned")));
            }
        }
        if self.job.state().is_terminal() {
            return Poll::Ready(self.job.terminal_outcome());
        }
        self.job.register_completion_waker(cx.waker());
        if let Some(caller) = self.caller {
            caller.register_cancellation_waker(cx.waker());
        }
        // Re-check to close the gap between the state test and waker
        // registration.
        if self.job.state().is_terminal() {
            return Poll::Ready(self.job.terminal_outcome());
        }
        Poll::Pending
    }
}

/// Future returned by [`Job::cancelled`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Cancelled<'a> {
    job: &'a Job,
}

impl Future for Cancelled<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.job.is_cancel_requested() {
            return Poll::Ready(());
        }
        self.job.register_cancellation_waker(cx.waker());
        if self.job.is_cancel_requested() {
            return Poll::Ready(());
        }
        Poll::Pending
    }
}
