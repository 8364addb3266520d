//! Cancellation reason and kind types.
//!
//! Cancellation is cooperative: a job asked to stop keeps running until its
//! next suspension point, where it observes the request and unwinds. The
//! types here record *why* the request was made, so joiners and log output
//! can attribute a cancelled subtree to its root cause.

use core::fmt;

/// The kind of cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CancelKind {
    /// Explicit cancellation requested by user code.
    User,
    /// Cancellation because a timeout/deadline elapsed.
    Timeout,
    /// Cancellation because a sibling job faulted (fail-fast policy).
    SiblingFailed,
    /// Cancellation propagated upward because a child job was cancelled.
    ChildCancelled,
    /// Cancellation propagated downward from a cancelled parent.
    ParentCancelled,
    /// Cancellation because the owning scope is being disposed.
    ScopeDisposed,
}

impl CancelKind {
    /// Returns the severity of this cancellation kind.
    ///
    /// [`CancelReason::escalate`] only replaces a reason with a strictly
    /// higher-severity one.
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Self::User => 0,
            Self::Timeout => 1,
            Self::SiblingFailed => 2,
            Self::ChildCancelled => 3,
            Self::ParentCancelled => 4,
            Self::ScopeDisposed => 5,
        }
    }
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Timeout => write!(f, "timeout"),
            Self::SiblingFailed => write!(f, "sibling failed"),
            Self::ChildCancelled => write!(f, "child cancelled"),
            Self::ParentCancelled => write!(f, "parent cancelled"),
            Self::ScopeDisposed => write!(f, "scope disposed"),
        }
    }
}

/// The reason for a cancellation, including kind and optional context.
///
/// The first reason to reach a job wins; a terminal job never changes its
/// recorded reason. [`CancelReason::escalate`] applies the same rule to a
/// reason that has not been recorded yet, for code that accumulates
/// candidate causes before requesting the cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReason {
    /// The kind of cancellation.
    pub kind: CancelKind,
    /// Optional human-readable message (static for determinism).
    pub message: Option<&'static str>,
}

impl CancelReason {
    /// Creates a new cancellation reason with the given kind.
    #[must_use]
    pub const fn new(kind: CancelKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Creates a user cancellation reason with a message.
    #[must_use]
    pub const fn user(message: &'static str) -> Self {
        Self {
            kind: CancelKind::User,
            message: Some(message),
        }
    }

    /// Creates a timeout cancellation reason.
    #[must_use]
    pub const fn timeout() -> Self {
        Self::new(CancelKind::Timeout)
    }

    /// Creates a sibling-failure cancellation reason.
    #[must_use]
    pub const fn sibling_failed() -> Self {
        Self::new(CancelKind::SiblingFailed)
    }

    /// Creates a child-cancelled reason, used when cancellation propagates
    /// from a child to its parent.
    #[must_use]
    pub const fn child_cancelled() -> Self {
        Self::new(CancelKind::ChildCancelled)
    }

    /// Creates a parent-cancelled cancellation reason.
    #[must_use]
    pub const fn parent_cancelled() -> Self {
        Self::new(CancelKind::ParentCancelled)
    }

    /// Creates a scope-disposed cancellation reason.
    #[must_use]
    pub const fn scope_disposed() -> Self {
        Self::new(CancelKind::ScopeDisposed)
    }

    /// Escalates this reason if `candidate` is strictly more severe.
    ///
    /// Reasons follow the same rule as the job state machine: whatever
    /// arrived first is authoritative. A candidate of equal or lower
    /// severity changes nothing, message included, so the recorded reason
    /// never flip-flops between two causes of the same rank. Returns
    /// `true` when the escalation happened.
    pub fn escalate(&mut self, candidate: &Self) -> bool {
        if candidate.kind.severity() > self.kind.severity() {
            *self = candidate.clone();
            return true;
        }
        false
    }

    /// Returns the kind of this cancellation reason.
    #[must_use]
    pub const fn kind(&self) -> CancelKind {
        self.kind
    }
}

impl Default for CancelReason {
    fn default() -> Self {
        Self::new(CancelKind::User)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}
