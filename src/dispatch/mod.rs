//! Dispatchers: policy objects that decide where work runs.
//!
//! A dispatcher receives a [`TaskCell`] and is responsible only for the
//! execution site; lifecycle stays with the task's job. The semantic
//! guarantees required of every implementation:
//!
//! 1. The work eventually runs, unless its job was cancelled before the
//!    first poll (the task envelope then resolves without touching user
//!    code).
//! 2. Failures from the work propagate through the job and result slot;
//!    the dispatcher never swallows them.

mod inline;
mod pool;
mod single;

pub use inline::{block_on, InlineDispatcher};
pub use pool::PoolDispatcher;
pub use single::SingleThreadDispatcher;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, OnceLock};
use std::task::{Context, Poll, Waker};

use crate::config::DispatchConfig;
use crate::error::Result;

/// A unit of submittable work: a boxed future behind a lock, polled by the
/// owning dispatcher.
///
/// Wakers handed to [`TaskCell::poll`] must never poll the cell
/// synchronously from `wake`: they enqueue the cell back onto the owning
/// dispatcher, which polls it on its next turn. Polling from `wake` on the
/// thread that is already inside `poll` would deadlock on the future slot.
#[derive(Clone)]
pub struct TaskCell {
    inner: Arc<TaskCellInner>,
}

struct TaskCellInner {
    future: Mutex<Option<Pin<Box<dyn Future<Output = ()> + Send>>>>,
}

impl std::fmt::Debug for TaskCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCell")
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl TaskCell {
    /// Wraps a future into a submittable cell.
    pub fn new(future: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            inner: Arc::new(TaskCellInner {
                future: Mutex::new(Some(Box::pin(future))),
            }),
        }
    }

    /// Polls the contained future once. Returns true when the future has
    /// finished (now or earlier); spurious polls after completion are
    /// harmless no-ops.
    pub fn poll(&self, waker: &Waker) -> bool {
        let mut slot = self.inner.future.lock().expect("task cell lock poisoned");
        let Some(future) = slot.as_mut() else {
            return true;
        };
        let mut cx = Context::from_waker(waker);
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                *slot = None;
                true
            }
            Poll::Pending => false,
        }
    }

    /// Returns true once the future has been polled to completion.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner
            .future
            .lock()
            .expect("task cell lock poisoned")
            .is_none()
    }
}

/// A policy object choosing where submitted work executes.
pub trait Dispatch: Send + Sync + std::fmt::Debug {
    /// Submits a task for execution.
    ///
    /// Fails with [`crate::ErrorKind::DispatcherStopped`] if the dispatcher
    /// no longer accepts work.
    fn dispatch(&self, task: TaskCell) -> Result<()>;

    /// A short name for log output.
    fn name(&self) -> &str;
}

/// Returns the process-wide default pooled dispatcher, creating it on
/// first use from [`DispatchConfig::from_env`] (falling back to defaults
/// when the environment is unparseable).
pub fn default_dispatcher() -> Arc<dyn Dispatch> {
    static POOL: OnceLock<Arc<PoolDispatcher>> = OnceLock::new();
    Arc::clone(POOL.get_or_init(|| {
        let config = DispatchConfig::from_env().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "invalid dispatcher environment; using defaults");
            DispatchConfig::default()
        });
        Arc::new(PoolDispatcher::new(&config))
    })) as Arc<dyn Dispatch>
}

/// Returns the process-wide IO-biased dispatcher: the same pool type with
/// a thread count sized for long-blocking waits.
pub fn io_dispatcher() -> Arc<dyn Dispatch> {
    static POOL: OnceLock<Arc<PoolDispatcher>> = OnceLock::new();
    Arc::clone(POOL.get_or_init(|| {
        let config = DispatchConfig::from_env().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "invalid dispatcher environment; using defaults");
            DispatchConfig::default()
        });
        Arc::new(PoolDispatcher::io(&config))
    })) as Arc<dyn Dispatch>
}
