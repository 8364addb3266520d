//! Identifier types for runtime entities.
//!
//! Identifiers are allocated from process-wide atomic counters, so they are
//! unique for the lifetime of the process and strictly increasing in
//! allocation order. The ordering property is load-bearing for
//! [`SubscriptionId`]: shared-flow subscribers are notified in subscription
//! order.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static JOB_COUNTER: AtomicU64 = AtomicU64::new(1);
static SCOPE_COUNTER: AtomicU64 = AtomicU64::new(1);
static SUBSCRIPTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for a job in the cancellation tree.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    /// Allocates the next job identifier.
    #[must_use]
    pub(crate) fn next() -> Self {
        Self(JOB_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "J{}", self.0)
    }
}

/// A unique identifier for a scope.
///
/// Scope ids are monotonically increasing and feed the default log
/// formatter together with the scope name. They do not affect scheduling.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Allocates the next scope identifier.
    #[must_use]
    pub(crate) fn next() -> Self {
        Self(SCOPE_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeId({})", self.0)
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// A unique identifier for a shared-flow subscription.
///
/// Strictly increasing: a subscriber registered later always has a larger
/// id, and emission fan-out visits subscribers in id order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Allocates the next subscription identifier.
    #[must_use]
    pub(crate) fn next() -> Self {
        Self(SUBSCRIPTION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub{}", self.0)
    }
}
