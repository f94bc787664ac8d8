//! The callback-timeout watchdog: one OS thread arming and firing
//! per-callback deadlines.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

/// Handle to an armed deadline, used to cancel it once the callback it
/// guards completes normally.
#[derive(Clone, Copy)]
pub(crate) struct WatchdogToken(u64);

struct Entry {
    deadline: Instant,
    token: u64,
    fire: Box<dyn FnOnce() + Send>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.token == other.token
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed so a `BinaryHeap` (a max-heap) surfaces the earliest
        // deadline first.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.token.cmp(&self.token))
    }
}

struct State {
    entries: BinaryHeap<Entry>,
    cancelled: HashSet<u64>,
    stopped: bool,
}

struct Inner {
    mutex: Mutex<State>,
    cv: Condvar,
    next_token: AtomicU64,
}

/// One thread, one deadline min-heap, shared across every task's
/// in-flight callbacks. Optional: a run loop configured with no
/// `callback_timeout` on any task never constructs one.
pub(crate) struct TimeoutWatchdog {
    inner: Arc<Inner>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TimeoutWatchdog {
    pub fn new() -> Self {
        let inner = Arc::new(Inner {
            mutex: Mutex::new(State {
                entries: BinaryHeap::new(),
                cancelled: HashSet::new(),
                stopped: false,
            }),
            cv: Condvar::new(),
            next_token: AtomicU64::new(0),
        });
        let driver = inner.clone();
        let thread = thread::Builder::new()
            .name("spark-runloop-watchdog".into())
            .spawn(move || Self::drive(driver))
            .expect("failed to spawn callback-timeout watchdog thread");
        Self {
            inner,
            thread: Mutex::new(Some(thread)),
        }
    }

    pub fn arm(&self, deadline: Instant, fire: impl FnOnce() + Send + 'static) -> WatchdogToken {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let mut state = self.inner.mutex.lock();
        state.entries.push(Entry {
            deadline,
            token,
            fire: Box::new(fire),
        });
        self.inner.cv.notify_all();
        WatchdogToken(token)
    }

    /// Cancels a previously armed deadline. A no-op if it already fired.
    pub fn cancel(&self, token: WatchdogToken) {
        self.inner.mutex.lock().cancelled.insert(token.0);
    }

    pub fn shutdown(&self) {
        {
            let mut state = self.inner.mutex.lock();
            state.stopped = true;
            self.inner.cv.notify_all();
        }
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }

    fn drive(inner: Arc<Inner>) {
        loop {
            let entry = {
                let mut state = inner.mutex.lock();
                loop {
                    if state.stopped {
                        return;
                    }
                    let next = state.entries.peek().map(|e| (e.token, e.deadline));
                    match next {
                        None => inner.cv.wait(&mut state),
                        Some((token, deadline)) => {
                            if state.cancelled.remove(&token) {
                                state.entries.pop();
                                continue;
                            }
                            let now = Instant::now();
                            if deadline <= now {
                                break;
                            }
                            inner.cv.wait_for(&mut state, deadline - now);
                        }
                    }
                }
                state.entries.pop().expect("peeked entry must still be present")
            };
            (entry.fire)();
        }
    }
}

impl Drop for TimeoutWatchdog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn fires_after_its_deadline() {
        let watchdog = TimeoutWatchdog::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        watchdog.arm(Instant::now() + Duration::from_millis(20), move || {
            flag.store(true, Ordering::SeqCst);
        });

        let deadline = Instant::now() + Duration::from_secs(2);
        while !fired.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn a_cancelled_deadline_never_fires() {
        let watchdog = TimeoutWatchdog::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let token = watchdog.arm(Instant::now() + Duration::from_millis(20), move || {
            flag.store(true, Ordering::SeqCst);
        });
        watchdog.cancel(token);

        thread::sleep(Duration::from_millis(80));
        assert!(!fired.load(Ordering::SeqCst));
    }
}
