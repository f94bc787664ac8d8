//! Per-container asynchronous task run loop.
//!
//! A [`run_loop::RunLoop`] owns a dedicated thread that multiplexes
//! envelopes from a single shared [`consumer::MultiplexedConsumer`]
//! across a fixed set of [`task::UserTask`]s, each with its own
//! concurrency ceiling, optional periodic window, and periodic commit.
//! Task completion arrives asynchronously and out of order; this crate
//! reorders it back into dispatch order before handing offsets to the
//! [`offset::OffsetManager`], and propagates any task failure as a
//! prompt, whole-loop abort rather than trying to recover in place.
//!
//! Build one with [`run_loop::RunLoopBuilder`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use spark_runloop::config::RunLoopConfig;
//! use spark_runloop::executor::TokioTaskExecutor;
//! use spark_runloop::run_loop::RunLoopBuilder;
//!
//! # fn build<E: spark_runloop::envelope::Envelope>(
//! #     consumer: Arc<dyn spark_runloop::consumer::MultiplexedConsumer<E>>,
//! #     offsets: Arc<dyn spark_runloop::offset::OffsetManager>,
//! #     task: Arc<dyn spark_runloop::task::UserTask<E>>,
//! #     rt_handle: tokio::runtime::Handle,
//! # ) -> Result<(), spark_runloop::error::RunLoopError> {
//! let config = RunLoopConfig::try_new(8)?;
//! let executor = Arc::new(TokioTaskExecutor::new(rt_handle));
//! let (run_loop, handle) = RunLoopBuilder::new(consumer, offsets, executor, config)
//!     .task(task)
//!     .build()?;
//! let join = run_loop.spawn();
//! handle.shutdown();
//! let _report = join.join().unwrap();
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod config;
pub mod consumer;
pub mod coordinator;
pub mod envelope;
pub mod error;
pub mod executor;
mod handle;
pub mod metrics;
pub mod offset;
pub mod report;
pub mod run_loop;
pub mod task;
mod task_state;
mod reorder;
mod timeout;
mod timer;
mod worker;

pub use callback::{Callback, CallbackFactory};
pub use config::RunLoopConfig;
pub use consumer::MultiplexedConsumer;
pub use coordinator::Coordinator;
pub use envelope::{Envelope, Partition, PendingEnvelope};
pub use error::{RunLoopError, SharedFailure, TaskFailure};
pub use executor::{BlockingPool, TaskExecutor, TokioBlockingPool, TokioTaskExecutor};
pub use handle::RunLoopHandle;
pub use metrics::{MetricsSink, NoopMetricsSink, RecordingMetricsSink};
pub use offset::OffsetManager;
pub use report::{RunLoopReport, StopReason, TaskSummary};
pub use run_loop::{RunLoop, RunLoopBuilder};
pub use task::UserTask;
