//! Coroscope: a structured-concurrency runtime with reactive flows.
//!
//! # Overview
//!
//! Coroscope provides a tree of cancellable jobs whose lifetimes are
//! hierarchically bound, pluggable dispatchers that decide where work
//! executes, result-bearing deferred values, channels with backpressure,
//! and a reactive layer of cold flows, hot broadcast/state holders, and
//! pipeline operators. A virtual-time harness makes all of it testable
//! without real waiting.
//!
//! # Core Guarantees
//!
//! - **Structured lifetimes**: every launched task is owned by a job in a
//!   tree; cancellation flows down, completion and failure flow up
//! - **Cooperative cancellation**: every suspension point observes a
//!   cancellation request and resumes with a cancellation error
//! - **One terminal transition**: a job moves from active to exactly one
//!   of completed/cancelled/faulted, decided by a single atomic step
//! - **No silent failures**: escaped errors and panics reach the
//!   uncaught-failure handler chain, never a dropped stack trace
//! - **Deterministic testing**: under the harness, execution is a pure
//!   function of the virtual-time advancement sequence
//!
//! # Module Structure
//!
//! - [`types`]: identifiers, timestamps, cancellation reasons
//! - [`error`]: the crate error type
//! - [`job`]: the cancellation tree
//! - [`scope`]: launching and supervising work
//! - [`context`]: the per-task capability context
//! - [`deferred`]: result-bearing task handles
//! - [`dispatch`]: execution-site policies (pool, IO, single-thread,
//!   inline)
//! - [`channel`]: bounded/unbounded/rendezvous FIFOs
//! - [`flow`]: cold flows, hot holders, operators
//! - [`time`]: time sources, sleeping, timed races
//! - [`testing`]: the virtual-time harness
//! - [`config`]: environment-driven dispatcher tuning
//! - [`observability`]: uncaught-failure reporting

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod channel;
pub mod config;
pub mod context;
pub mod deferred;
pub mod dispatch;
pub mod error;
pub mod flow;
pub mod job;
pub mod observability;
pub mod scope;
pub mod test_utils;
pub mod testing;
pub mod time;
pub mod types;

pub use channel::Channel;
pub use config::DispatchConfig;
pub use context::JobContext;
pub use deferred::Deferred;
pub use dispatch::{
    block_on, default_dispatcher, io_dispatcher, Dispatch, InlineDispatcher, PoolDispatcher,
    SingleThreadDispatcher,
};
pub use error::{Error, ErrorKind, Result};
pub use flow::{flow, flow_of, merge, Flow, FlowCollector, SharedFlow, StateFlow, Subscription};
pub use job::{Job, JobPolicy, JobState};
pub use observability::{FailureHandlers, ScopeTag};
pub use scope::{LaunchOptions, Scope, ScopeBuilder, Start};
pub use testing::{TestDispatcher, TestScope, TestScopeConfig, VirtualClock};
pub use time::{with_timeout, Sleep, TimeSource, WallClock};
pub use types::{CancelKind, CancelReason, JobId, ScopeId, Time};
