//! # TaskWorker：单任务的调度与回调协调器
//!
//! ## 核心意图（Why）
//! - 把 `TaskState` 做出的"该不该跑、跑什么"决策，转化为对
//!   [`crate::task::UserTask`] 的实际调用，并在回调乱序返回时把它们重新
//!   排成提交顺序；
//! - `messages_in_flight` 必须在派发的同一时刻（而不是等已派发的 future
//!   真正被执行器轮询到）更新，否则并发上限形同虚设——分发和"在途计数
//!   生效"之间的任何间隙都会被下一次 tick 钻空子。
//!
//! ## 架构定位（Where）
//! - 每个注册任务对应一个 `TaskWorker`，由 [`crate::run_loop::RunLoop`]
//!   持有并在其专属线程上驱动；
//! - 通过 [`crate::callback::CallbackFactory`]/[`crate::callback::Callback`]
//!   把回调完成事件路由回来，这些完成可能发生在任意线程上。
//!
//! ## 行为契约（What）
//! - `run`：非阻塞，决定并派发下一个操作（commit/window/process 之一）；
//! - `complete`/`fail`：回调终止路径，分别驱动重排缓冲区的提交推进或把
//!   整个循环标记为致命失败；
//! - `is_idle`：供关闭流程判断这个任务是否已经彻底排空。
//!
//! ## 风险提示（Trade-offs）
//! - 回调超时和正常完成可能竞争同一个 in-flight 条目，靠 `HashMap::remove`
//!   的"谁先到谁处理"语义天然去重，后到者被当作重复完成丢弃。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::callback::CallbackFactory;
use crate::consumer::MultiplexedConsumer;
use crate::coordinator::{Coordinator, CoordinatorRequestSink};
use crate::envelope::{Envelope, PendingEnvelope};
use crate::error::{RunLoopError, TaskFailure};
use crate::executor::{BlockingPool, TaskExecutor};
use crate::handle::RunLoopHandle;
use crate::metrics::MetricsSink;
use crate::offset::OffsetManager;
use crate::reorder::CallbackReorderBuffer;
use crate::report::TaskSummary;
use crate::task::UserTask;
use crate::task_state::{NextOp, TaskState};
use crate::timeout::{TimeoutWatchdog, WatchdogToken};
use crate::timer::PeriodicTimer;

struct InFlightEntry<E: Envelope> {
    envelope: Arc<E>,
    coordinator: Coordinator,
    timeout_token: Option<WatchdogToken>,
    dispatched_at: Instant,
}

/// Owns one task's queue, in-flight bookkeeping, and reorder buffer, and
/// is the bridge between [`TaskState`]'s scheduling decisions and the
/// actual [`UserTask`] calls.
pub(crate) struct TaskWorker<E: Envelope> {
    task: Arc<dyn UserTask<E>>,
    state: TaskState<E>,
    reorder: Mutex<CallbackReorderBuffer>,
    in_flight: Mutex<HashMap<u64, InFlightEntry<E>>>,
    next_sequence: AtomicU64,
    consumer: Arc<dyn MultiplexedConsumer<E>>,
    offsets: Arc<dyn OffsetManager>,
    metrics: Arc<dyn MetricsSink>,
    executor: Arc<dyn TaskExecutor>,
    blocking_pool: Option<Arc<dyn BlockingPool>>,
    callback_timeout: Option<Duration>,
    stuck_dispatch_warning: Option<Duration>,
    watchdog: Arc<TimeoutWatchdog>,
    handle: RunLoopHandle,
    coordinator_sink: Arc<CoordinatorRequestSink>,
    envelopes_processed: AtomicU64,
    windows_run: AtomicU64,
    commits_run: AtomicU64,
}

#[derive(Clone, Copy)]
enum SideOp {
    Window,
    Commit,
}

impl<E: Envelope> TaskWorker<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task: Arc<dyn UserTask<E>>,
        max_concurrency: usize,
        callback_timeout: Option<Duration>,
        stuck_dispatch_warning: Option<Duration>,
        consumer: Arc<dyn MultiplexedConsumer<E>>,
        offsets: Arc<dyn OffsetManager>,
        metrics: Arc<dyn MetricsSink>,
        executor: Arc<dyn TaskExecutor>,
        blocking_pool: Option<Arc<dyn BlockingPool>>,
        watchdog: Arc<TimeoutWatchdog>,
        handle: RunLoopHandle,
        coordinator_sink: Arc<CoordinatorRequestSink>,
    ) -> Self {
        let task_name = task.task_name().to_string();
        Self {
            task,
            state: TaskState::new(task_name, max_concurrency),
            reorder: Mutex::new(CallbackReorderBuffer::new()),
            in_flight: Mutex::new(HashMap::new()),
            next_sequence: AtomicU64::new(0),
            consumer,
            offsets,
            metrics,
            executor,
            blocking_pool,
            callback_timeout,
            stuck_dispatch_warning,
            watchdog,
            handle,
            coordinator_sink,
            envelopes_processed: AtomicU64::new(0),
            windows_run: AtomicU64::new(0),
            commits_run: AtomicU64::new(0),
        }
    }

    pub fn task_name(&self) -> &str {
        self.state.task_name()
    }

    pub fn enqueue(&self, pending: Arc<PendingEnvelope<E>>) {
        self.state.enqueue(pending);
        self.metrics.observe_pending_messages(self.state.queue_len() as u64);
    }

    /// Current `messages_in_flight / max_concurrency` ratio, reported to
    /// [`crate::metrics::MetricsSink::set_utilization`] around every state
    /// change that could move it.
    pub fn utilization(&self) -> f64 {
        self.state.utilization()
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready(&self.coordinator_sink)
    }

    pub fn has_pending_work(&self) -> bool {
        self.state.has_pending_work()
    }

    pub fn is_idle(&self) -> bool {
        self.state.is_idle()
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            envelopes_processed: self.envelopes_processed.load(Ordering::Relaxed),
            windows_run: self.windows_run.load(Ordering::Relaxed),
            commits_run: self.commits_run.load(Ordering::Relaxed),
        }
    }

    /// Registers this task's periodic window/commit schedule with the
    /// shared timer thread. Called once, at loop startup.
    pub fn init(self: &Arc<Self>, timer: &PeriodicTimer, window: Option<Duration>, commit: Option<Duration>) {
        if let Some(interval) = window {
            if self.task.is_windowable() {
                let worker = self.clone();
                timer.schedule(interval, move || {
                    worker.state.request_window();
                    worker.handle.resume();
                });
            }
        }
        if let Some(interval) = commit {
            let worker = self.clone();
            timer.schedule(interval, move || {
                worker.state.request_commit();
                worker.handle.resume();
            });
        }
        if let Some(threshold) = self.stuck_dispatch_warning {
            let worker = self.clone();
            timer.schedule(threshold, move || worker.scan_stuck_dispatches(threshold));
        }
    }

    /// Logs and counts, but never touches, any callback that has been
    /// outstanding longer than `threshold` without its timeout (if any)
    /// having fired yet. Purely observational — the dispatch itself is
    /// left alone either way.
    fn scan_stuck_dispatches(&self, threshold: Duration) {
        let now = Instant::now();
        let stuck: Vec<u64> = self
            .in_flight
            .lock()
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.dispatched_at) >= threshold)
            .map(|(sequence, _)| *sequence)
            .collect();
        for sequence in stuck {
            self.metrics.inc_stuck_dispatch();
            tracing::warn!(
                task = self.task_name(),
                sequence,
                threshold_ms = threshold.as_millis() as u64,
                "callback dispatch has exceeded the stuck-dispatch warning threshold"
            );
        }
    }

    /// Decides and dispatches this task's next operation, if any.
    /// Non-blocking: `process` and `window`/`commit` (when a blocking
    /// pool is configured) both hand off the actual work and return
    /// immediately.
    pub fn run(self: &Arc<Self>) {
        match self.state.next_op(&self.coordinator_sink) {
            NextOp::Commit => self.run_side_op(SideOp::Commit),
            NextOp::Window => self.run_side_op(SideOp::Window),
            NextOp::Process => {
                if let Some(pending) = self.fetch_envelope() {
                    self.dispatch_process(pending);
                }
            }
            NextOp::NoOp => {}
        }
    }

    /// Pops the head of this task's pending queue, marking it processed
    /// and releasing the consumer's backpressure on that partition if
    /// this call is the one that won the broadcast-fan-out race.
    fn fetch_envelope(&self) -> Option<Arc<PendingEnvelope<E>>> {
        let pending = self.state.pop_pending()?;
        if pending.mark_processed() {
            self.consumer.try_update(pending.envelope().partition());
        }
        Some(pending)
    }

    /// Bumps `messages_in_flight` synchronously, on the loop thread, before
    /// ever handing the envelope to the executor — a dispatch counts
    /// against `max_concurrency` from the instant it is issued, not from
    /// whenever the spawned future happens to first get polled.
    fn dispatch_process(self: &Arc<Self>, pending: Arc<PendingEnvelope<E>>) {
        let envelope = pending.envelope().clone();
        let task = self.task.clone();
        let factory = CallbackFactory {
            worker: self.clone(),
            envelope: envelope.clone(),
        };
        let coordinator = Coordinator::new();
        let metrics = self.metrics.clone();
        self.state.increment_in_flight();
        self.metrics.inc_processes();
        self.metrics.set_utilization(self.state.utilization());
        self.executor.spawn(Box::pin(async move {
            let start = Instant::now();
            task.process(envelope, coordinator, factory).await;
            metrics.observe_process_ns(start.elapsed().as_nanos() as u64);
        }));
    }

    /// Registers one in-flight callback for `envelope`, returning its
    /// dispatch sequence. Called from [`CallbackFactory::new_handle`] —
    /// by this point `messages_in_flight` has already been bumped by
    /// [`Self::dispatch_process`], so this only allocates bookkeeping that
    /// can't happen before the task is actually entered: the sequence
    /// number and (if configured) the watchdog deadline.
    pub(crate) fn begin_dispatch(self: &Arc<Self>, envelope: Arc<E>, coordinator: Coordinator) -> u64 {
        let sequence = self.next_sequence.fetch_add(1, Ordering::AcqRel);

        let timeout_token = self.callback_timeout.map(|timeout| {
            let worker = self.clone();
            self.watchdog
                .arm(Instant::now() + timeout, move || worker.timeout_fail(sequence))
        });

        self.in_flight.lock().insert(
            sequence,
            InFlightEntry {
                envelope,
                coordinator,
                timeout_token,
                dispatched_at: Instant::now(),
            },
        );
        sequence
    }

    /// A callback completed successfully: retires it in dispatch order,
    /// commits whatever offset that unblocks, and resumes the loop.
    pub(crate) fn complete(self: &Arc<Self>, sequence: u64) {
        let entry = match self.in_flight.lock().remove(&sequence) {
            Some(entry) => entry,
            None => {
                self.metrics.inc_duplicate_callback();
                tracing::debug!(task = self.task_name(), sequence, "duplicate callback completion ignored");
                return;
            }
        };
        if let Some(token) = entry.timeout_token {
            self.watchdog.cancel(token);
        }
        self.state.decrement_in_flight();
        self.metrics.set_utilization(self.state.utilization());
        self.envelopes_processed.fetch_add(1, Ordering::Relaxed);

        let partition = entry.envelope.partition().clone();
        let offset = entry.envelope.offset();
        let retired = self
            .reorder
            .lock()
            .retire(sequence, partition, offset, entry.coordinator);

        if let Some((partition, offset, coordinator)) = retired {
            if let Err(cause) = self.offsets.update(self.task_name(), &partition, offset) {
                self.handle
                    .abort(RunLoopError::OffsetManager(cause.to_string()));
                return;
            }
            self.coordinator_sink.absorb(self.task_name(), &coordinator);
        }
        self.handle.resume();
    }

    /// A callback failed, or the callback-timeout watchdog fired for it.
    /// Per the sticky-abort policy, this is always fatal: no offset is
    /// advanced and no reorder-buffer entry is ever created for it.
    pub(crate) fn fail(self: &Arc<Self>, sequence: u64, error: TaskFailure) {
        let entry = match self.in_flight.lock().remove(&sequence) {
            Some(entry) => entry,
            None => {
                self.metrics.inc_duplicate_callback();
                tracing::debug!(task = self.task_name(), sequence, "duplicate callback failure ignored");
                return;
            }
        };
        if let Some(token) = entry.timeout_token {
            self.watchdog.cancel(token);
        }
        self.state.decrement_in_flight();
        self.metrics.set_utilization(self.state.utilization());
        self.handle.abort(RunLoopError::UserTaskFailed {
            task: self.task_name().to_string(),
            cause: error.into(),
        });
    }

    /// The callback-timeout watchdog fired for this sequence without a
    /// normal completion beating it to the punch. Distinguished from
    /// [`Self::fail`] so the abort carries [`RunLoopError::CallbackTimeout`]
    /// rather than an opaque user-task failure.
    fn timeout_fail(self: &Arc<Self>, sequence: u64) {
        let entry = match self.in_flight.lock().remove(&sequence) {
            Some(entry) => entry,
            None => {
                self.metrics.inc_duplicate_callback();
                return;
            }
        };
        drop(entry);
        self.state.decrement_in_flight();
        self.metrics.set_utilization(self.state.utilization());
        self.handle.abort(RunLoopError::CallbackTimeout {
            task: self.task_name().to_string(),
            sequence,
        });
    }

    fn run_side_op(self: &Arc<Self>, op: SideOp) {
        let worker = self.clone();
        let job = move || {
            let start = Instant::now();
            let mut coordinator = Coordinator::new();
            let result = match op {
                SideOp::Window => worker.task.window(&mut coordinator),
                SideOp::Commit => worker.task.commit(),
            };
            let elapsed_ns = start.elapsed().as_nanos() as u64;
            match op {
                SideOp::Window => {
                    worker.metrics.observe_window_ns(elapsed_ns);
                    worker.windows_run.fetch_add(1, Ordering::Relaxed);
                }
                SideOp::Commit => {
                    worker.metrics.observe_commit_ns(elapsed_ns);
                    worker.commits_run.fetch_add(1, Ordering::Relaxed);
                }
            }
            worker.finish_side_op(result, coordinator);
        };

        match op {
            SideOp::Window => self.metrics.inc_windows(),
            SideOp::Commit => self.metrics.inc_commits(),
        }

        match &self.blocking_pool {
            Some(pool) => pool.execute(Box::new(job)),
            None => job(),
        }
    }

    fn finish_side_op(self: &Arc<Self>, result: Result<(), TaskFailure>, coordinator: Coordinator) {
        self.state.finish_window_or_commit();
        match result {
            Ok(()) => {
                self.coordinator_sink.absorb(self.task_name(), &coordinator);
            }
            Err(cause) => {
                self.handle.abort(RunLoopError::UserTaskFailed {
                    task: self.task_name().to_string(),
                    cause: cause.into(),
                });
            }
        }
        self.handle.resume();
    }
}

