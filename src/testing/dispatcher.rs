//! Deterministic single-threaded dispatcher for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Wake, Waker};

use crate::dispatch::{Dispatch, TaskCell};
use crate::error::Result;

struct TestDispatchInner {
    queue: Mutex<VecDeque<TaskCell>>,
    draining: AtomicBool,
    processed: AtomicU64,
}

impl TestDispatchInner {
    fn enqueue(&self, task: TaskCell) {
        self.queue
            .lock()
            .expect("test dispatcher queue lock poisoned")
            .push_back(task);
    }
}

struct TestWaker {
    cell: TaskCell,
    inner: Arc<TestDispatchInner>,
}

impl Wake for TestWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.inner.enqueue(self.cell.clone());
    }
}

/// A dispatcher with a deterministic cooperative schedule.
///
/// `dispatch` from outside a drain runs the task synchronously to its
/// first suspension point, then drains the FIFO until empty. `dispatch`
/// (and every waker) from inside a drain only enqueues: the first task
/// runs first, subsequently queued tasks run in insertion order.
#[derive(Clone)]
pub struct TestDispatcher {
    inner: Arc<TestDispatchInner>,
}

impl std::fmt::Debug for TestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestDispatcher")
            .field("pending", &self.pending())
            .field("processed", &self.processed())
            .finish()
    }
}

impl Default for TestDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl TestDispatcher {
    /// Creates an empty test dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TestDispatchInner {
                queue: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                processed: AtomicU64::new(0),
            }),
        }
    }

    /// Runs queued tasks until the FIFO is empty. Re-entrant calls (from
    /// a task currently being polled) return immediately; the outer drain
    /// picks up whatever they enqueued.
    pub fn drain(&self) {
        if self.inner.draining.swap(true, Ordering::AcqRel) {
            return;
        }
        loop {
            let task = self
                .inner
                .queue
                .lock()
                .expect("test dispatcher queue lock poisoned")
                .pop_front();
            let Some(task) = task else { break };
            let waker = Waker::from(Arc::new(TestWaker {
                cell: task.clone(),
                inner: Arc::clone(&self.inner),
            }));
            task.poll(&waker);
            self.inner.processed.fetch_add(1, Ordering::AcqRel);
        }
        self.inner.draining.store(false, Ordering::Release);
    }

    /// Number of tasks waiting in the FIFO.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner
            .queue
            .lock()
            .expect("test dispatcher queue lock poisoned")
            .len()
    }

    /// Total number of task polls performed.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.inner.processed.load(Ordering::Acquire)
    }

    /// Discards every queued task.
    ///
    /// Discarded cells are dropped outside the queue lock: dropping a
    /// task's last handle terminates its job, which may wake (and thus
    /// re-enqueue) other tasks.
    pub fn clear(&self) {
        let discarded: Vec<TaskCell> = {
            let mut queue = self
                .inner
                .queue
                .lock()
                .expect("test dispatcher queue lock poisoned");
            queue.drain(..).collect()
        };
        drop(discarded);
    }
}

impl Dispatch for TestDispatcher {
    fn dispatch(&self, task: TaskCell) -> Result<()> {
        self.inner.enqueue(task);
        self.drain();
        Ok(())
    }

    fn name(&self) -> &str {
        "virtual"
    }
}
