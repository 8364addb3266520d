//! Inline dispatcher and the thread-parking `block_on` it is built on.

use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::thread::Thread;

use super::{Dispatch, TaskCell};
use crate::error::Result;

/// Wakes a parked thread.
struct ThreadWaker {
    thread: Thread,
    notified: AtomicBool,
}

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.notified.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

/// Drives a future to completion on the calling thread.
///
/// The thread parks between polls, so this composes with work running on
/// other dispatchers: their wakers unpark it.
pub fn block_on<F: Future>(future: F) -> F::Output {
    let waker_state = Arc::new(ThreadWaker {
        thread: std::thread::current(),
        notified: AtomicBool::new(false),
    });
    let waker = Waker::from(Arc::clone(&waker_state));
    let mut cx = Context::from_waker(&waker);
    let mut future = pin!(future);

    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(value) => return value,
            Poll::Pending => {
                while !waker_state.notified.swap(false, Ordering::AcqRel) {
                    std::thread::park();
                }
            }
        }
    }
}

/// A dispatcher that runs work synchronously on the caller thread.
///
/// `dispatch` does not return until the task has finished: the unconfined
/// optimization for work that is cheap or already on the right thread.
/// Never submit work here that waits on something the caller itself must
/// produce.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl InlineDispatcher {
    /// Creates the inline dispatcher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dispatch for InlineDispatcher {
    fn dispatch(&self, task: TaskCell) -> Result<()> {
        block_on(std::future::poll_fn(|cx| {
            if task.poll(cx.waker()) {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        }));
        Ok(())
    }

    fn name(&self) -> &str {
        "inline"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_on_returns_value() {
        assert_eq!(block_on(async { 41 + 1 }), 42);
    }

    #[test]
    fn block_on_survives_self_wake() {
        struct YieldOnce {
            yielded: bool,
        }

        impl Future for YieldOnce {
            type Output = u32;

            fn poll(
                mut self: std::pin::Pin<&mut Self>,
                cx: &mut Context<'_>,
            ) -> Poll<Self::Output> {
                if self.yielded {
                    Poll::Ready(7)
                } else {
                    self.yielded = true;
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
            }
        }

        assert_eq!(block_on(YieldOnce { yielded: false }), 7);
    }

    #[test]
    fn inline_dispatch_runs_to_completion_before_returning() {
        let cell = TaskCell::new(async {});
        InlineDispatcher::new().dispatch(cell.clone()).expect("inline accepts work");
        assert!(cell.is_finished());
    }
}
