//! Monotonic wall-clock time source with a lazily started timer driver.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::task::Waker;
use std::time::{Duration, Instant};

use super::TimeSource;
use crate::types::Time;

struct TimerEntry {
    deadline: Time,
    seq: u64,
    waker: Waker,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

struct TimerQueue {
    timers: BinaryHeap<Reverse<TimerEntry>>,
    next_seq: u64,
    driver_running: bool,
}

struct DriverState {
    queue: Mutex<TimerQueue>,
    changed: Condvar,
}

/// A monotonic real-time [`TimeSource`].
///
/// `now` is the elapsed time since the clock was created. Deadline wakeups
/// are served by a driver thread that exists only while timers are
/// pending: it exits when the queue drains and is respawned on the next
/// registration.
#[derive(Clone)]
pub struct WallClock {
    origin: Instant,
    state: Arc<DriverState>,
}

impl std::fmt::Debug for WallClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WallClock").field("now", &self.now()).finish()
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClock {
    /// Creates a wall clock whose origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Arc::new(DriverState {
                queue: Mutex::new(TimerQueue {
                    timers: BinaryHeap::new(),
                    next_seq: 0,
                    driver_running: false,
                }),
                changed: Condvar::new(),
            }),
        }
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Time {
        let nanos = u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX);
        Time::from_nanos(nanos)
    }

    fn register(&self, deadline: Time, waker: &Waker) {
        if self.now() >= deadline {
            waker.wake_by_ref();
            return;
        }
        let mut queue = self.state.queue.lock().expect("timer queue lock poisoned");
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.timers.push(Reverse(TimerEntry {
            deadline,
            seq,
            waker: waker.clone(),
        }));
        if !queue.driver_running {
            queue.driver_running = true;
            let origin = self.origin;
            let state = Arc::downgrade(&self.state);
            std::thread::Builder::new()
                .name("coroscope-timer".to_string())
                .spawn(move || drive_timers(origin, &state))
                .expect("failed to spawn timer driver thread");
        }
        drop(queue);
        self.state.changed.notify_one();
    }
}

fn drive_timers(origin: Instant, state: &Weak<DriverState>) {
    loop {
        let Some(state) = state.upgrade() else { return };

        let mut due = Vec::new();
        {
            let mut queue = state.queue.lock().expect("timer queue lock poisoned");
            let now = Time::from_nanos(
                u64::try_from(origin.elapsed().as_nanos()).unwrap_or(u64::MAX),
            );

            while queue
                .timers
                .peek()
                .is_some_and(|Reverse(entry)| entry.deadline <= now)
            {
                if let Some(Reverse(entry)) = queue.timers.pop() {
                    due.push(entry.waker);
                }
            }

            if due.is_empty() {
                let wait = queue
                    .timers
                    .peek()
                    .map(|Reverse(entry)| Duration::from_nanos(entry.deadline.duration_since(now)));
                match wait {
                    Some(wait) => {
                        let (guard, _) = state
                            .changed
                            .wait_timeout(queue, wait)
                            .expect("timer queue lock poisoned");
                        drop(guard);
                    }
                    None => {
                        // Queue drained: the driver retires and the next
                        // registration respawns it.
                        queue.driver_running = false;
                        return;
                    }
                }
            }
        }

        for waker in due {
            waker.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::task::Wake;

    struct FlagWaker(AtomicBool);

    impl Wake for FlagWaker {
        fn wake(self: Arc<Self>) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn now_is_monotonic() {
        let clock = WallClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn past_deadline_wakes_immediately() {
        let clock = WallClock::new();
        let flag = Arc::new(FlagWaker(AtomicBool::new(false)));
        let waker = Waker::from(Arc::clone(&flag));
        clock.register(Time::ZERO, &waker);
        assert!(flag.0.load(Ordering::SeqCst));
    }

    #[test]
    fn future_deadline_wakes_after_elapsing() {
        let clock = WallClock::new();
        let flag = Arc::new(FlagWaker(AtomicBool::new(false)));
        let waker = Waker::from(Arc::clone(&flag));
        clock.register(clock.now() + Duration::from_millis(20), &waker);
        assert!(!flag.0.load(Ordering::SeqCst));

        let deadline = Instant::now() + Duration::from_secs(2);
        while !flag.0.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(flag.0.load(Ordering::SeqCst));
    }
}
