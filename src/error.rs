//! Error types and error-handling strategy.
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Cancellation is a distinct, non-failure outcome with its own kind
//! - Panics from user blocks are isolated and converted to
//!   [`ErrorKind::Panic`], never allowed to cross the runtime boundary
//! - [`Error`] is `Clone` (context string, `Arc` source) so a failure
//!   stored on a job can be reported to every joiner

use core::fmt;
use std::sync::Arc;

use crate::types::CancelReason;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Cancellation ===
    /// Operation was cancelled.
    Cancelled,
    /// A timed operation lost the race against its deadline.
    Timeout,

    // === Channels ===
    /// Channel is closed.
    ChannelClosed,
    /// Channel is full (would block).
    ChannelFull,
    /// Channel is empty (would block).
    ChannelEmpty,

    // === Structural ===
    /// The scope has been disposed; no new work can be launched on it.
    ScopeDisposed,
    /// The dispatcher has been shut down and no longer accepts work.
    DispatcherStopped,

    // === User blocks ===
    /// A user block panicked; the payload is in the context string.
    Panic,
    /// User-provided error.
    User,
}

/// The main error type for runtime operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error represents cooperative cancellation.
    ///
    /// Timeouts are not cancellation: a [`ErrorKind::Timeout`] surfaced by a
    /// timed wait is a real failure of that wait.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error is a timeout condition.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Adds deterministic context text to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Creates a cancellation error from a structured reason.
    #[must_use]
    pub fn cancelled(reason: &CancelReason) -> Self {
        Self::new(ErrorKind::Cancelled).with_context(format!("{reason}"))
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::new(ErrorKind::Timeout)
    }

    /// Creates an error from a caught panic payload.
    #[must_use]
    pub fn panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload.downcast_ref::<&str>().map_or_else(
            || {
                payload
                    .downcast_ref::<String>()
                    .cloned()
                    .unwrap_or_else(|| "opaque panic payload".to_string())
            },
            |s| (*s).to_string(),
        );
        Self::new(ErrorKind::Panic).with_context(message)
    }

    /// Creates a user error wrapping an arbitrary error value.
    #[must_use]
    pub fn user(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(ErrorKind::User).with_source(source)
    }

    /// Creates a user error carrying only a message.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_context(message)
    }

    /// Returns the context string, if any.
    #[must_use]
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CancelKind;

    #[test]
    fn cancellation_predicate() {
        let err = Error::cancelled(&CancelReason::new(CancelKind::User));
        assert!(err.is_cancelled());
        assert!(!err.is_timeout());
    }

    #[test]
    fn timeout_is_not_cancellation() {
        let err = Error::timeout();
        assert!(err.is_timeout());
        assert!(!err.is_cancelled());
    }

    #[test]
    fn panic_payload_message_is_preserved() {
        let err = Error::panic(&"boom");
        assert_eq!(err.kind(), ErrorKind::Panic);
        assert_eq!(err.context(), Some("boom"));

        let err = Error::panic(&String::from("kaboom"));
        assert_eq!(err.context(), Some("kaboom"));
    }

    #[test]
    fn display_includes_context() {
        let err = Error::new(ErrorKind::ChannelClosed).with_context("rendezvous");
        assert_eq!(format!("{err}"), "ChannelClosed: rendezvous");
    }

    #[test]
    fn clone_shares_source() {
        let err = Error::msg("original").with_source(std::io::Error::other("io"));
        let cloned = err.clone();
        assert!(std::error::Error::source(&cloned).is_some());
    }
}
