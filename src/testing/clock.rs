//! Virtual time controller.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::task::Waker;
use std::time::Duration;

use crate::time::TimeSource;
use crate::types::Time;

struct VirtualTimer {
    deadline: Time,
    seq: u64,
    waker: Waker,
}

impl PartialEq for VirtualTimer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for VirtualTimer {}

impl PartialOrd for VirtualTimer {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VirtualTimer {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // (deadline, seq): earliest first, insertion order breaking ties.
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

struct ClockInner {
    now: Time,
    next_seq: u64,
    timers: BinaryHeap<Reverse<VirtualTimer>>,
}

/// A simulated clock: a `now` cursor plus a deadline queue, advanced only
/// by explicit calls.
///
/// Determinism guarantees:
/// - same advancement sequence → same wake order
/// - ties on a deadline wake in registration order
/// - no wall-clock dependency anywhere
#[derive(Debug)]
pub struct VirtualClock {
    inner: Mutex<ClockInner>,
}

impl std::fmt::Debug for ClockInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockInner")
            .field("now", &self.now)
            .field("pending", &self.timers.len())
            .finish()
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualClock {
    /// Creates a clock at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ClockInner {
                now: Time::ZERO,
                next_seq: 0,
                timers: BinaryHeap::new(),
            }),
        }
    }

    /// Returns the earliest pending deadline, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Time> {
        self.inner
            .lock()
            .expect("virtual clock lock poisoned")
            .timers
            .peek()
            .map(|Reverse(timer)| timer.deadline)
    }

    /// Number of pending timers.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.inner
            .lock()
            .expect("virtual clock lock poisoned")
            .timers
            .len()
    }

    /// Moves the cursor to `target`, waking each due timer at its own
    /// deadline in (deadline, registration) order. Wakers run outside
    /// the clock lock, so woken tasks may register new timers at or
    /// before `target`; they are honored in the same call.
    pub fn advance_to(&self, target: Time) {
        loop {
            let batch: Vec<Waker> = {
                let mut inner = self.inner.lock().expect("virtual clock lock poisoned");
                let Some(Reverse(first)) = inner.timers.peek() else {
                    break;
                };
                let deadline = first.deadline;
                if deadline > target {
                    break;
                }
                if deadline > inner.now {
                    inner.now = deadline;
                }
                let mut batch = Vec::new();
                while inner
                    .timers
                    .peek()
                    .is_some_and(|Reverse(timer)| timer.deadline == deadline)
                {
                    if let Some(Reverse(timer)) = inner.timers.pop() {
                        batch.push(timer.waker);
                    }
                }
                batch
            };
            for waker in batch {
                waker.wake();
            }
        }

        let mut inner = self.inner.lock().expect("virtual clock lock poisoned");
        if target > inner.now {
            inner.now = target;
        }
    }

    /// Advances the cursor by `duration`.
    pub fn advance_by(&self, duration: Duration) {
        let target = self.now() + duration;
        self.advance_to(target);
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> Time {
        self.inner.lock().expect("virtual clock lock poisoned").now
    }

    fn register(&self, deadline: Time, waker: &Waker) {
        let mut inner = self.inner.lock().expect("virtual clock lock poisoned");
        if deadline <= inner.now {
            drop(inner);
            waker.wake_by_ref();
            return;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.timers.push(Reverse(VirtualTimer {
            deadline,
            seq,
            waker: waker.clone(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};
    use std::task::Wake;

    struct LogWaker {
        label: u32,
        log: Arc<StdMutex<Vec<u32>>>,
    }

    impl Wake for LogWaker {
        fn wake(self: Arc<Self>) {
            self.log.lock().unwrap().push(self.label);
        }
    }

    fn log_waker(label: u32, log: &Arc<StdMutex<Vec<u32>>>) -> Waker {
        Waker::from(Arc::new(LogWaker {
            label,
            log: Arc::clone(log),
        }))
    }

    #[test]
    fn starts_at_zero() {
        let clock = VirtualClock::new();
        assert_eq!(clock.now(), Time::ZERO);
    }

    #[test]
    fn wakes_in_deadline_order() {
        let clock = VirtualClock::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        clock.register(Time::from_millis(100), &log_waker(1, &log));
        clock.register(Time::from_millis(50), &log_waker(2, &log));
        clock.register(Time::from_millis(150), &log_waker(3, &log));

        clock.advance_to(Time::from_millis(120));
        assert_eq!(*log.lock().unwrap(), vec![2, 1]);
        assert_eq!(clock.now(), Time::from_millis(120));

        clock.advance_to(Time::from_millis(200));
        assert_eq!(*log.lock().unwrap(), vec![2, 1, 3]);
    }

    #[test]
    fn same_deadline_wakes_in_registration_order() {
        let clock = VirtualClock::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        for label in 0..4 {
            clock.register(Time::from_millis(10), &log_waker(label, &log));
        }
        clock.advance_by(Duration::from_millis(10));
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn past_deadline_wakes_immediately() {
        let clock = VirtualClock::new();
        clock.advance_to(Time::from_millis(100));

        struct CountWaker(AtomicUsize);
        impl Wake for CountWaker {
            fn wake(self: Arc<Self>) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let counter = Arc::new(CountWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));
        clock.register(Time::from_millis(50), &waker);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(clock.pending_timers(), 0);
    }

    #[test]
    fn advance_without_timers_moves_the_cursor() {
        let clock = VirtualClock::new();
        clock.advance_by(Duration::from_secs(3));
        assert_eq!(clock.now(), Time::from_secs(3));
    }
}
