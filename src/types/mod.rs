//! Core value types shared across the runtime.
//!
//! - [`JobId`] / [`ScopeId`]: stable identifiers for tree nodes and scopes
//! - [`Time`]: a logical nanosecond timestamp (wall clock or virtual)
//! - [`CancelKind`] / [`CancelReason`]: why a job stopped cooperating

mod cancel;
mod id;
mod time;

pub use cancel::{CancelKind, CancelReason};
pub use id::{JobId, ScopeId, SubscriptionId};
pub use time::Time;
