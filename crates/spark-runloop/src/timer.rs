//! The periodic-timer thread: one OS thread serving every task's window
//! and commit interval.

use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct ScheduledTick {
    interval: Duration,
    next_fire: Instant,
    callback: Box<dyn Fn() + Send>,
}

struct State {
    ticks: Vec<ScheduledTick>,
    stopped: bool,
}

struct Inner {
    mutex: Mutex<State>,
    cv: Condvar,
}

/// Drives every task's `window`/`commit` interval off a single thread,
/// rather than one sleeping thread per interval.
pub(crate) struct PeriodicTimer {
    inner: std::sync::Arc<Inner>,
    thread: Option<thread::JoinHandle<()>>,
}

impl PeriodicTimer {
    pub fn new() -> Self {
        let inner = std::sync::Arc::new(Inner {
            mutex: Mutex::new(State {
                ticks: Vec::new(),
                stopped: false,
            }),
            cv: Condvar::new(),
        });
        let driver = inner.clone();
        let thread = thread::Builder::new()
            .name("spark-runloop-timer".into())
            .spawn(move || Self::drive(driver))
            .expect("failed to spawn periodic-timer thread");
        Self {
            inner,
            thread: Some(thread),
        }
    }

    /// Registers a recurring callback. Fired from the timer thread, so
    /// `callback` must be fast and non-blocking — in practice it only
    /// ever flips a flag and calls [`crate::handle::RunLoopHandle::resume`].
    pub fn schedule(&self, interval: Duration, callback: impl Fn() + Send + 'static) {
        if interval.is_zero() {
            return;
        }
        let mut state = self.inner.mutex.lock();
        state.ticks.push(ScheduledTick {
            interval,
            next_fire: Instant::now() + interval,
            callback: Box::new(callback),
        });
        self.inner.cv.notify_all();
    }

    pub fn shutdown(&mut self) {
        {
            let mut state = self.inner.mutex.lock();
            state.stopped = true;
            self.inner.cv.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    fn drive(inner: std::sync::Arc<Inner>) {
        let mut state = inner.mutex.lock();
        loop {
            if state.stopped {
                return;
            }
            let now = Instant::now();
            let next_fire = state.ticks.iter().map(|t| t.next_fire).min();
            match next_fire {
                None => inner.cv.wait(&mut state),
                Some(at) if at > now => {
                    inner.cv.wait_for(&mut state, at - now);
                }
                Some(_) => {
                    let now = Instant::now();
                    for tick in state.ticks.iter_mut() {
                        if tick.next_fire <= now {
                            (tick.callback)();
                            tick.next_fire = now + tick.interval;
                        }
                    }
                }
            }
        }
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
