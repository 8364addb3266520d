//! Virtual-time test harness.
//!
//! [`TestScope`] wraps a [`Scope`] over the deterministic
//! [`TestDispatcher`] and the [`VirtualClock`], so time-dependent
//! concurrent code runs without real waiting and with a reproducible
//! schedule: execution is a pure function of the sequence of
//! advancement calls.

mod clock;
mod dispatcher;

pub use clock::VirtualClock;
pub use dispatcher::TestDispatcher;

use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

use crate::context::JobContext;
use crate::scope::Scope;
use crate::time::TimeSource;
use crate::types::Time;

/// Iterations without progress before the stuck-detector intervenes.
const STUCK_ITERATIONS: u32 = 100;
/// Virtual step used by [`TestScope::run_until_idle`].
const IDLE_STEP: Duration = Duration::from_millis(10);
/// Forced advance applied by the stuck-detector.
const STUCK_ADVANCE: Duration = Duration::from_millis(100);

/// Harness configuration.
#[derive(Debug, Clone)]
pub struct TestScopeConfig {
    /// Scope display name.
    pub name: String,
    /// When true, the stuck-detector panics instead of force-advancing
    /// virtual time past an apparently unreachable future.
    pub strict: bool,
    /// Default wall-clock bound for [`TestScope::run_until_idle`].
    pub wall_timeout: Duration,
}

impl Default for TestScopeConfig {
    fn default() -> Self {
        Self {
            name: "test".to_string(),
            strict: cfg!(feature = "strict-harness"),
            wall_timeout: Duration::from_secs(5),
        }
    }
}

impl TestScopeConfig {
    /// Sets the scope name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets strict mode: fail instead of force-advancing when stuck.
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Sets the wall-clock bound for idle runs.
    #[must_use]
    pub fn wall_timeout(mut self, timeout: Duration) -> Self {
        self.wall_timeout = timeout;
        self
    }
}

/// A scope wired to virtual time and a deterministic dispatcher.
#[derive(Debug)]
pub struct TestScope {
    scope: Scope,
    clock: Arc<VirtualClock>,
    dispatcher: TestDispatcher,
    config: TestScopeConfig,
}

impl Default for TestScope {
    fn default() -> Self {
        Self::new()
    }
}

impl TestScope {
    /// Creates a harness with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(TestScopeConfig::default())
    }

    /// Creates a harness with the given configuration.
    #[must_use]
    pub fn with_config(config: TestScopeConfig) -> Self {
        let clock = Arc::new(VirtualClock::new());
        let dispatcher = TestDispatcher::new();
        let scope = Scope::builder()
            .name(config.name.clone())
            .dispatcher(Arc::new(dispatcher.clone()))
            .time_source(Arc::clone(&clock) as Arc<dyn TimeSource>)
            .build();
        Self {
            scope,
            clock,
            dispatcher,
            config,
        }
    }

    /// The wrapped scope.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// The virtual clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<VirtualClock> {
        &self.clock
    }

    /// The deterministic dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &TestDispatcher {
        &self.dispatcher
    }

    /// A context bound to the scope's root job.
    #[must_use]
    pub fn context(&self) -> JobContext {
        self.scope.context()
    }

    /// Current virtual time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.clock.now()
    }

    /// Advances virtual time by `duration`, processing every task the
    /// clock wakes along the way. Tasks scheduled for an intermediate
    /// deadline run at that deadline and may schedule further work that
    /// is still honored within this call.
    pub fn advance_time_by(&self, duration: Duration) {
        let target = self.clock.now() + duration;
        loop {
            self.dispatcher.drain();
            let Some(next) = self.clock.next_deadline().filter(|d| *d <= target) else {
                break;
            };
            self.clock.advance_to(next);
            self.dispatcher.drain();
        }
        self.clock.advance_to(target);
        self.dispatcher.drain();
    }

    /// True iff no launched job is active and no dispatcher work is
    /// queued.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.scope.active_jobs() == 0 && self.dispatcher.pending() == 0
    }

    /// Runs until idle or the configured wall-clock timeout elapses;
    /// see [`TestScope::run_until_idle_within`].
    pub fn run_until_idle(&self) -> bool {
        self.run_until_idle_within(self.config.wall_timeout)
    }

    /// Repeatedly advances virtual time in small steps until no active
    /// jobs remain and the dispatcher FIFO is empty.
    ///
    /// Returns `false` strictly when `wall_timeout` of real time has
    /// elapsed with jobs still active. After many progress-free
    /// iterations the stuck-detector force-advances virtual time by a
    /// larger step and logs a diagnostic; a test that needs this nudge
    /// usually awaits a future nothing will ever complete. In strict
    /// mode it panics instead.
    ///
    /// # Panics
    ///
    /// Panics in strict mode when no progress is observed.
    pub fn run_until_idle_within(&self, wall_timeout: Duration) -> bool {
        let started = std::time::Instant::now();
        let mut stale_iterations = 0u32;
        let mut last_marker = self.progress_marker();

        loop {
            self.dispatcher.drain();
            if self.is_idle() {
                return true;
            }
            if started.elapsed() > wall_timeout {
                return false;
            }

            self.advance_time_by(IDLE_STEP);

            let marker = self.progress_marker();
            if marker == last_marker {
                stale_iterations += 1;
            } else {
                stale_iterations = 0;
                last_marker = marker;
            }

            if stale_iterations >= STUCK_ITERATIONS {
                assert!(
                    !self.config.strict,
                    "virtual time stuck: {} active jobs made no progress over {} iterations",
                    self.scope.active_jobs(),
                    STUCK_ITERATIONS,
                );
                tracing::warn!(
                    active_jobs = self.scope.active_jobs(),
                    iterations = STUCK_ITERATIONS,
                    advance_ms = STUCK_ADVANCE.as_millis() as u64,
                    "no progress under virtual time; force-advancing past a possibly unreachable future"
                );
                self.advance_time_by(STUCK_ADVANCE);
                stale_iterations = 0;
            }
        }
    }

    fn progress_marker(&self) -> (usize, u64) {
        // The clock cursor is deliberately excluded: advancing time is not
        // progress unless it made a task run.
        (self.scope.active_jobs(), self.dispatcher.processed())
    }

    /// Drives a future on the harness thread, draining dispatcher work
    /// and advancing virtual time while it is pending.
    ///
    /// # Panics
    ///
    /// Panics if the future is still pending after the configured
    /// wall-clock timeout.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        struct FlagWaker(AtomicBool);

        impl Wake for FlagWaker {
            fn wake(self: Arc<Self>) {
                self.0.store(true, Ordering::Release);
            }

            fn wake_by_ref(self: &Arc<Self>) {
                self.0.store(true, Ordering::Release);
            }
        }

        let flag = Arc::new(FlagWaker(AtomicBool::new(false)));
        let waker = Waker::from(Arc::clone(&flag));
        let mut cx = Context::from_waker(&waker);
        let mut future = pin!(future);
        let started = std::time::Instant::now();

        loop {
            if let Poll::Ready(value) = future.as_mut().poll(&mut cx) {
                return value;
            }
            self.dispatcher.drain();
            if !flag.0.swap(false, Ordering::AcqRel) {
                // Nothing woke the test body; only time can.
                self.advance_time_by(IDLE_STEP);
            }
            assert!(
                started.elapsed() <= self.config.wall_timeout,
                "block_on exceeded the harness wall timeout",
            );
        }
    }

    /// Cancels the scope and clears the dispatcher FIFO.
    pub fn dispose(&self) {
        self.scope.dispose();
        self.dispatcher.drain();
        self.dispatcher.clear();
    }
}

impl Drop for TestScope {
    fn drop(&mut self) {
        self.dispose();
    }
}
