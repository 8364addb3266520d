//! Single-thread dispatcher: one dedicated worker draining a FIFO.
//!
//! Useful for sequential critical sections and "main"-like contexts where
//! submitted work must never run concurrently with itself.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Wake, Waker};
use std::thread::JoinHandle;

use super::{Dispatch, TaskCell};
use crate::error::{Error, ErrorKind, Result};

struct SingleShared {
    queue: Mutex<VecDeque<TaskCell>>,
    available: Condvar,
    disposed: AtomicBool,
    name: String,
}

impl SingleShared {
    fn push(&self, task: TaskCell) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::DispatcherStopped).with_context(self.name.clone()));
        }
        self.queue
            .lock()
            .expect("single dispatcher queue lock poisoned")
            .push_back(task);
        self.available.notify_one();
        Ok(())
    }
}

struct SingleWaker {
    cell: TaskCell,
    shared: Arc<SingleShared>,
}

impl Wake for SingleWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if self.shared.push(self.cell.clone()).is_err() {
            tracing::warn!(
                dispatcher = %self.shared.name,
                "task woken after dispose; abandoning it"
            );
        }
    }
}

/// A dispatcher with exactly one worker thread consuming a FIFO.
///
/// The worker is held by an explicit [`JoinHandle`] that
/// [`SingleThreadDispatcher::dispose`] waits on, so a worker panic
/// surfaces at disposal instead of vanishing into a detached thread.
pub struct SingleThreadDispatcher {
    shared: Arc<SingleShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SingleThreadDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleThreadDispatcher")
            .field("name", &self.shared.name)
            .field("disposed", &self.shared.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

impl SingleThreadDispatcher {
    /// Creates the dispatcher and starts its worker thread.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let shared = Arc::new(SingleShared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            disposed: AtomicBool::new(false),
            name: name.into(),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(shared.name.clone())
                .spawn(move || worker_loop(&shared))
                .expect("failed to spawn single dispatcher worker")
        };

        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Stops the worker: the queue closes, queued tasks are dropped, and
    /// the worker thread is joined. A worker panic is re-raised here.
    ///
    /// # Panics
    ///
    /// Panics if the worker thread itself panicked while draining.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.available.notify_all();
        let handle = self
            .worker
            .lock()
            .expect("single dispatcher worker lock poisoned")
            .take();
        let mut worker_panic = None;
        if let Some(handle) = handle {
            if handle.thread().id() != std::thread::current().id() {
                if let Err(payload) = handle.join() {
                    worker_panic = Some(payload);
                }
            }
        }
        // Discarded cells are dropped outside the queue lock; dropping a
        // task's last handle terminates its job, which may fan out wakes.
        let discarded: Vec<TaskCell> = {
            let mut queue = self
                .shared
                .queue
                .lock()
                .expect("single dispatcher queue lock poisoned");
            queue.drain(..).collect()
        };
        drop(discarded);
        if let Some(payload) = worker_panic {
            std::panic::resume_unwind(payload);
        }
        tracing::debug!(dispatcher = %self.shared.name, "single dispatcher disposed");
    }

    /// Returns true once [`SingleThreadDispatcher::dispose`] has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }
}

impl Drop for SingleThreadDispatcher {
    fn drop(&mut self) {
        // Dropping must not re-raise a worker panic mid-unwind; dispose()
        // is the loud path.
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.available.notify_all();
        let handle = self
            .worker
            .lock()
            .expect("single dispatcher worker lock poisoned")
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                tracing::error!(
                    dispatcher = %self.shared.name,
                    "single dispatcher worker panicked"
                );
            }
        }
    }
}

impl Dispatch for SingleThreadDispatcher {
    fn dispatch(&self, task: TaskCell) -> Result<()> {
        self.shared.push(task)
    }

    fn name(&self) -> &str {
        &self.shared.name
    }
}

fn worker_loop(shared: &Arc<SingleShared>) {
    loop {
        let task = {
            let mut queue = shared
                .queue
                .lock()
                .expect("single dispatcher queue lock poisoned");
            loop {
                if shared.disposed.load(Ordering::Acquire) {
                    return;
                }
                if let Some(task) = queue.pop_front() {
                    break task;
                }
                queue = shared
                    .available
                    .wait(queue)
                    .expect("single dispatcher queue lock poisoned");
            }
        };
        let waker = Waker::from(Arc::new(SingleWaker {
            cell: task.clone(),
            shared: Arc::clone(shared),
        }));
        task.poll(&waker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn work_runs_in_submission_order() {
        crate::test_utils::init_logging();
        let dispatcher = SingleThreadDispatcher::new("test-single");
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut cells = Vec::new();
        for i in 0..4 {
            let log = Arc::clone(&log);
            let cell = TaskCell::new(async move {
                log.lock().unwrap().push(i);
            });
            dispatcher.dispatch(cell.clone()).expect("accepts work");
            cells.push(cell);
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while cells.iter().any(|c| !c.is_finished())
            && std::time::Instant::now() < deadline
        {
            std::thread::yield_now();
        }
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3]);
        dispatcher.dispose();
    }

    #[test]
    fn dispatch_after_dispose_fails() {
        crate::test_utils::init_logging();
        let dispatcher = SingleThreadDispatcher::new("test-single-disposed");
        dispatcher.dispose();
        let err = dispatcher.dispatch(TaskCell::new(async {})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DispatcherStopped);
    }

    #[test]
    fn sequential_counter_is_never_contended() {
        crate::test_utils::init_logging();
        let dispatcher = SingleThreadDispatcher::new("test-single-seq");
        let counter = Arc::new(AtomicUsize::new(0));
        let mut cells = Vec::new();
        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            let cell = TaskCell::new(async move {
                let seen = counter.load(Ordering::SeqCst);
                counter.store(seen + 1, Ordering::SeqCst);
            });
            dispatcher.dispatch(cell.clone()).expect("accepts work");
            cells.push(cell);
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while cells.iter().any(|c| !c.is_finished())
            && std::time::Instant::now() < deadline
        {
            std::thread::yield_now();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 16);
        dispatcher.dispose();
    }
}
