//! Uncaught-failure reporting.
//!
//! Failures that escape a user block are routed to a chain of handlers
//! rather than printed or silently dropped. The chain is carried by the
//! owning [`Scope`](crate::scope::Scope) and threaded into every task
//! context, so reporting needs no global mutable state; when no handler is
//! installed, the tail behavior is a structured `tracing::error!` event
//! tagged with the scope name and id.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::types::ScopeId;

/// Human-readable identification of a scope, used by the default log
/// formatter. Does not affect scheduling.
#[derive(Debug, Clone)]
pub struct ScopeTag {
    /// The scope's display name.
    pub name: String,
    /// The scope's monotonically increasing id.
    pub id: ScopeId,
}

impl ScopeTag {
    /// Creates a tag with the given name and a freshly allocated id.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: ScopeId::next(),
        }
    }
}

impl std::fmt::Display for ScopeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

type HandlerFn = Arc<dyn Fn(Option<&ScopeTag>, &Error) + Send + Sync>;

/// A chain of uncaught-failure handlers.
///
/// Handlers receive `(optional scope tag, error)`. They run in installation
/// order; a panicking handler is swallowed and does not stop the rest of
/// the chain. Cloning shares the chain.
#[derive(Clone, Default)]
pub struct FailureHandlers {
    chain: Arc<Mutex<Vec<(u64, HandlerFn)>>>,
}

impl std::fmt::Debug for FailureHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.chain.lock().map(|c| c.len()).unwrap_or(0);
        f.debug_struct("FailureHandlers")
            .field("installed", &len)
            .finish()
    }
}

impl FailureHandlers {
    /// Creates an empty handler chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a handler, returning a guard that uninstalls it on drop.
    #[must_use]
    pub fn install(
        &self,
        handler: impl Fn(Option<&ScopeTag>, &Error) + Send + Sync + 'static,
    ) -> HandlerGuard {
        static NEXT_TOKEN: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);
        let token = NEXT_TOKEN.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.chain
            .lock()
            .expect("handler chain lock poisoned")
            .push((token, Arc::new(handler)));
        HandlerGuard {
            chain: Arc::downgrade(&self.chain),
            token,
        }
    }

    /// Reports a failure through the chain.
    ///
    /// With no handlers installed, emits a `tracing::error!` event instead
    /// so the failure is never lost.
    pub fn report(&self, tag: Option<&ScopeTag>, error: &Error) {
        let snapshot: Vec<HandlerFn> = self
            .chain
            .lock()
            .expect("handler chain lock poisoned")
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();

        if snapshot.is_empty() {
            match tag {
                Some(tag) => tracing::error!(
                    scope = %tag.name,
                    scope_id = %tag.id,
                    error = %error,
                    "uncaught failure"
                ),
                None => tracing::error!(error = %error, "uncaught failure"),
            }
            return;
        }

        for handler in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(tag, error)));
            if outcome.is_err() {
                tracing::warn!("uncaught-failure handler panicked; continuing the chain");
            }
        }
    }

    /// Returns the number of installed handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chain.lock().expect("handler chain lock poisoned").len()
    }

    /// Returns true if no handler is installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Uninstalls its handler from the chain when dropped.
#[derive(Debug)]
#[must_use = "dropping the guard uninstalls the handler"]
pub struct HandlerGuard {
    chain: std::sync::Weak<Mutex<Vec<(u64, HandlerFn)>>>,
    token: u64,
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        if let Some(chain) = self.chain.upgrade() {
            let mut chain = chain.lock().expect("handler chain lock poisoned");
            chain.retain(|(token, _)| *token != self.token);
        }
    }
}
