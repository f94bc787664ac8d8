//! Where `process` futures and `window`/`commit` closures actually run.
//!
//! # Grounding
//! Shaped after `spark-core::runtime::executor::TaskExecutor`: a thin,
//! object-safe spawn surface the run loop depends on abstractly, so
//! tests can swap in a single-threaded executor while production code
//! uses a real `tokio::runtime::Handle`.

use std::future::Future;
use std::pin::Pin;

/// A pinned, boxed, `'static` future — the same shape
/// `spark-core::runtime::task::ManagedSendTask` stores its work in.
pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Runs the async side of `process`. The run loop spawns one future per
/// dispatch and never awaits it directly — completion arrives later, out
/// of band, through [`crate::callback::Callback`].
pub trait TaskExecutor: Send + Sync + 'static {
    fn spawn(&self, future: BoxFuture);
}

/// Runs the synchronous side of `window`/`commit` when a worker pool is
/// configured, keeping the loop thread free to keep dispatching other
/// tasks while a slow window flush is in progress.
pub trait BlockingPool: Send + Sync + 'static {
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>);
}

/// [`TaskExecutor`] backed by a `tokio::runtime::Handle`. The expected
/// production implementation; tests typically build one from
/// `tokio::runtime::Runtime::handle()`.
pub struct TokioTaskExecutor {
    handle: tokio::runtime::Handle,
}

impl TokioTaskExecutor {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }
}

impl TaskExecutor for TokioTaskExecutor {
    fn spawn(&self, future: BoxFuture) {
        self.handle.spawn(future);
    }
}

/// [`BlockingPool`] backed by `tokio::task::spawn_blocking`.
pub struct TokioBlockingPool {
    handle: tokio::runtime::Handle,
}

impl TokioBlockingPool {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }
}

impl BlockingPool for TokioBlockingPool {
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>) {
        self.handle.spawn_blocking(job);
    }
}
