//! Pooled dispatcher backed by a fixed set of worker threads.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Wake, Waker};
use std::thread::JoinHandle;

use super::{Dispatch, TaskCell};
use crate::config::DispatchConfig;
use crate::error::{Error, ErrorKind, Result};

struct PoolShared {
    queue: Mutex<VecDeque<TaskCell>>,
    available: Condvar,
    shutdown: AtomicBool,
    name: String,
}

impl PoolShared {
    fn push(&self, task: TaskCell) -> Result<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::DispatcherStopped).with_context(self.name.clone()));
        }
        self.queue
            .lock()
            .expect("pool queue lock poisoned")
            .push_back(task);
        self.available.notify_one();
        Ok(())
    }
}

/// Wakes a parked task by pushing its cell back onto the pool queue.
struct PoolWaker {
    cell: TaskCell,
    shared: Arc<PoolShared>,
}

impl Wake for PoolWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if self.shared.push(self.cell.clone()).is_err() {
            tracing::warn!(
                pool = %self.shared.name,
                "task woken after pool shutdown; abandoning it"
            );
        }
    }
}

/// A dispatcher running tasks on a fixed pool of OS threads.
///
/// Two sizings share the implementation: [`PoolDispatcher::new`] for
/// balanced CPU work and [`PoolDispatcher::io`] for workloads dominated by
/// long-blocking waits. There is no work stealing between pools: a task
/// submitted here runs here.
pub struct PoolDispatcher {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for PoolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolDispatcher")
            .field("name", &self.shared.name)
            .field("shutdown", &self.shared.shutdown.load(Ordering::Relaxed))
            .finish()
    }
}

impl PoolDispatcher {
    /// Creates the default CPU-balanced pool.
    #[must_use]
    pub fn new(config: &DispatchConfig) -> Self {
        Self::start(config, config.workers, format!("{}-pool", config.thread_name_prefix))
    }

    /// Creates the IO-biased pool: more threads, same semantics, intended
    /// for work that parks on disk or network for long stretches.
    #[must_use]
    pub fn io(config: &DispatchConfig) -> Self {
        Self::start(config, config.io_workers, format!("{}-io", config.thread_name_prefix))
    }

    fn start(config: &DispatchConfig, count: usize, name: String) -> Self {
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            name,
        });

        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let shared = Arc::clone(&shared);
            let mut builder =
                std::thread::Builder::new().name(format!("{}-{index}", shared.name));
            if let Some(stack) = config.thread_stack_size {
                builder = builder.stack_size(stack);
            }
            let handle = builder
                .spawn(move || worker_loop(&shared))
                .expect("failed to spawn pool worker thread");
            workers.push(handle);
        }

        tracing::debug!(pool = %shared.name, workers = count, "dispatcher pool started");
        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Stops accepting work, wakes every worker, and joins them.
    ///
    /// Tasks still queued are dropped; their jobs observe this through the
    /// task envelope's drop path.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.available.notify_all();
        let workers = {
            let mut guard = self.workers.lock().expect("pool workers lock poisoned");
            std::mem::take(&mut *guard)
        };
        let current = std::thread::current().id();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!(pool = %self.shared.name, "pool worker panicked");
            }
        }
        // Discarded cells are dropped outside the queue lock; dropping a
        // task's last handle terminates its job, which may fan out wakes.
        let discarded: Vec<TaskCell> = {
            let mut queue = self.shared.queue.lock().expect("pool queue lock poisoned");
            queue.drain(..).collect()
        };
        drop(discarded);
        tracing::debug!(pool = %self.shared.name, "dispatcher pool stopped");
    }
}

impl Drop for PoolDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Dispatch for PoolDispatcher {
    fn dispatch(&self, task: TaskCell) -> Result<()> {
        self.shared.push(task)
    }

    fn name(&self) -> &str {
        &self.shared.name
    }
}

fn worker_loop(shared: &Arc<PoolShared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().expect("pool queue lock poisoned");
            loop {
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                if let Some(task) = queue.pop_front() {
                    break task;
                }
                queue = shared
                    .available
                    .wait(queue)
                    .expect("pool queue lock poisoned");
            }
        };
        let waker = Waker::from(Arc::new(PoolWaker {
            cell: task.clone(),
            shared: Arc::clone(shared),
        }));
        task.poll(&waker);
    }
}
