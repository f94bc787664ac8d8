//! # RunLoop：单线程调度核心
//!
//! ## 核心意图（Why）
//! - 用一条专属线程把"从共享消费者里取下一条消息"和"把它派发给哪些任务"
//!   这两件事串成一个确定性的 choose → fan out → run tasks → block-if-idle
//!   循环，避免多线程同时抢占同一个分区消费者；
//! - 两条关闭路径语义不同，绝不能合并成一个标志位：协调器发起的关闭
//!   （[`crate::coordinator::Coordinator::request_shutdown`]）要求排空所有
//!   在途工作再退出，而 [`crate::handle::RunLoopHandle::shutdown`] 只承诺
//!   "当前这一轮 tick 做完的操作完成后、在有界时间内退出"，不等待任何任务
//!   控制的状态（可能永远不会满足的排空条件）。
//!
//! ## 架构定位（Where）
//! - [`RunLoopBuilder`] 收集任务注册和共享依赖，产出一对
//!   `(RunLoop, RunLoopHandle)`；前者在专属线程上跑到底，后者留在调用方
//!   手里，用来在运行期间请求关闭、转发致命错误。
//!
//! ## 行为契约（What）
//! - `tick_loop`：先看显式 stop 请求（立即退出，不排空），再看 draining
//!   门（排空后退出），否则选下一条消息、派发给所有任务、必要时阻塞等待。
//! - `teardown`：无论正常退出还是致命错误退出都会跑，关掉定时器和看门狗
//!   线程。
//!
//! ## 风险提示（Trade-offs）
//! - `choose_envelope` 返回 `None` 时仍然要跑一轮 `run_tasks`，因为窗口/
//!   提交这类周期性副作用不依赖新消息到达。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::RunLoopConfig;
use crate::consumer::MultiplexedConsumer;
use crate::coordinator::CoordinatorRequestSink;
use crate::envelope::{Envelope, Partition, PendingEnvelope};
use crate::error::RunLoopError;
use crate::executor::{BlockingPool, TaskExecutor};
use crate::handle::RunLoopHandle;
use crate::metrics::{MetricsSink, NoopMetricsSink};
use crate::offset::OffsetManager;
use crate::report::{RunLoopReport, StopReason};
use crate::task::UserTask;
use crate::timeout::TimeoutWatchdog;
use crate::timer::PeriodicTimer;
use crate::worker::TaskWorker;

/// Accumulates task registrations and shared dependencies, then produces
/// a [`RunLoop`] plus the [`RunLoopHandle`] used to control it.
pub struct RunLoopBuilder<E: Envelope> {
    consumer: Arc<dyn MultiplexedConsumer<E>>,
    offsets: Arc<dyn OffsetManager>,
    executor: Arc<dyn TaskExecutor>,
    metrics: Arc<dyn MetricsSink>,
    blocking_pool: Option<Arc<dyn BlockingPool>>,
    default_config: RunLoopConfig,
    tasks: Vec<(Arc<dyn UserTask<E>>, RunLoopConfig)>,
}

impl<E: Envelope> RunLoopBuilder<E> {
    pub fn new(
        consumer: Arc<dyn MultiplexedConsumer<E>>,
        offsets: Arc<dyn OffsetManager>,
        executor: Arc<dyn TaskExecutor>,
        default_config: RunLoopConfig,
    ) -> Self {
        Self {
            consumer,
            offsets,
            executor,
            metrics: Arc::new(NoopMetricsSink),
            blocking_pool: None,
            default_config,
            tasks: Vec::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_blocking_pool(mut self, pool: Arc<dyn BlockingPool>) -> Self {
        self.blocking_pool = Some(pool);
        self
    }

    /// Registers a task under the builder's default config.
    pub fn task(self, task: Arc<dyn UserTask<E>>) -> Self {
        let config = self.default_config.clone();
        self.task_with_config(task, config)
    }

    /// Registers a task with its own config, overriding the builder's
    /// default for this task only.
    pub fn task_with_config(mut self, task: Arc<dyn UserTask<E>>, config: RunLoopConfig) -> Self {
        self.tasks.push((task, config));
        self
    }

    pub fn build(self) -> Result<(RunLoop<E>, RunLoopHandle), RunLoopError> {
        if self.tasks.is_empty() {
            return Err(RunLoopError::InvalidConfig(
                "a run loop needs at least one registered task".into(),
            ));
        }

        let coordinator_sink = Arc::new(CoordinatorRequestSink::new());
        let handle = RunLoopHandle::new(coordinator_sink.clone());
        let timer = PeriodicTimer::new();
        let watchdog = Arc::new(TimeoutWatchdog::new());

        let mut workers: Vec<Arc<TaskWorker<E>>> = Vec::with_capacity(self.tasks.len());
        let mut tasks_of_partition: HashMap<Partition, Vec<Arc<TaskWorker<E>>>> = HashMap::new();

        for (task, config) in self.tasks {
            let partitions = task.partitions().to_vec();
            let worker = Arc::new(TaskWorker::new(
                task,
                config.max_concurrency(),
                config.callback_timeout(),
                config.stuck_dispatch_warning(),
                self.consumer.clone(),
                self.offsets.clone(),
                self.metrics.clone(),
                self.executor.clone(),
                self.blocking_pool.clone(),
                watchdog.clone(),
                handle.clone(),
                coordinator_sink.clone(),
            ));
            worker.init(&timer, config.window(), config.commit());
            for partition in partitions {
                tasks_of_partition.entry(partition).or_default().push(worker.clone());
            }
            workers.push(worker);
        }

        let run_loop = RunLoop {
            workers,
            tasks_of_partition,
            consumer: self.consumer,
            coordinator_sink,
            metrics: self.metrics,
            handle: handle.clone(),
            timer,
            watchdog,
        };
        Ok((run_loop, handle))
    }
}

/// The scheduling core. Call [`run`](Self::run) on a dedicated thread (or
/// via [`spawn`](Self::spawn)); it blocks that thread until shutdown or a
/// fatal error and returns a [`RunLoopReport`].
pub struct RunLoop<E: Envelope> {
    workers: Vec<Arc<TaskWorker<E>>>,
    tasks_of_partition: HashMap<Partition, Vec<Arc<TaskWorker<E>>>>,
    consumer: Arc<dyn MultiplexedConsumer<E>>,
    coordinator_sink: Arc<CoordinatorRequestSink>,
    metrics: Arc<dyn MetricsSink>,
    handle: RunLoopHandle,
    timer: PeriodicTimer,
    watchdog: Arc<TimeoutWatchdog>,
}

impl<E: Envelope> RunLoop<E> {
    /// Spawns this loop onto a dedicated OS thread and returns its
    /// `JoinHandle` together with the control handle already produced by
    /// [`RunLoopBuilder::build`]. A convenience for the common case;
    /// callers that want to manage the thread themselves can call
    /// [`run`](Self::run) directly instead.
    pub fn spawn(self) -> std::thread::JoinHandle<RunLoopReport> {
        std::thread::Builder::new()
            .name("spark-runloop".into())
            .spawn(move || self.run())
            .expect("failed to spawn run loop thread")
    }

    /// Runs the tick loop to completion on the calling thread.
    pub fn run(mut self) -> RunLoopReport {
        tracing::info!(tasks = self.workers.len(), "run loop starting");
        let reason = self.tick_loop();
        self.teardown();
        let tasks = self
            .workers
            .iter()
            .map(|w| (w.task_name().to_string(), w.summary()))
            .collect();
        match reason {
            Ok(()) => RunLoopReport {
                reason: StopReason::Shutdown,
                tasks,
            },
            Err(error) => RunLoopReport {
                reason: StopReason::Fatal(error),
                tasks,
            },
        }
    }

    fn tick_loop(&mut self) -> Result<(), RunLoopError> {
        loop {
            if let Some(error) = self.handle.take_fatal_error() {
                return Err(error);
            }

            // The explicit-handle stop path is checked first and exits
            // unconditionally: it is bounded by "after the current tick's
            // operations complete", not by how much work is still queued
            // or in flight. Checking it here, before anything else this
            // iteration, means it never waits on task-controlled state
            // that a coordinator-originated drain would (a queued message
            // with no capacity to run, a callback with no
            // `callback_timeout` that never completes).
            if self.handle.is_stop_requested() {
                return Ok(());
            }

            let draining = self.handle.is_draining();
            if draining
                && !self.coordinator_sink.has_pending_commits()
                && self.workers.iter().all(|w| w.is_idle())
            {
                return Ok(());
            }

            // Once a coordinator-originated shutdown is requested, stop
            // pulling new envelopes from the consumer but keep ticking
            // every task so in-flight work, queued messages, and any
            // outstanding commit requests still drain to completion.
            let envelope = if draining { None } else { self.choose_envelope()? };
            self.run_tasks(envelope.as_ref())?;
            self.block_if_busy(envelope.is_some());
        }
    }

    fn choose_envelope(&self) -> Result<Option<Arc<E>>, RunLoopError> {
        let start = Instant::now();
        let result = self
            .consumer
            .choose()
            .map_err(|cause| RunLoopError::Consumer(cause.to_string()));
        self.metrics
            .observe_choose_ns(start.elapsed().as_nanos() as u64);
        result
    }

    fn run_tasks(&self, envelope: Option<&Arc<E>>) -> Result<(), RunLoopError> {
        if let Some(envelope) = envelope {
            self.metrics.inc_envelopes();
            let partition = envelope.partition();
            let workers = self
                .tasks_of_partition
                .get(partition)
                .ok_or_else(|| RunLoopError::UnmappedPartition {
                    partition: partition.clone(),
                })?;
            let pending = Arc::new(PendingEnvelope::new(envelope.clone()));
            for worker in workers {
                worker.enqueue(pending.clone());
            }
        } else {
            self.metrics.inc_null_envelopes();
        }

        for worker in &self.workers {
            worker.run();
        }
        Ok(())
    }

    fn block_if_busy(&self, had_envelope: bool) {
        let start = Instant::now();
        let timeout = if had_envelope {
            None
        } else {
            Some(self.consumer.poll_interval())
        };
        self.handle.wait_while_idle(
            || {
                self.workers
                    .iter()
                    .any(|w| w.is_ready() && (had_envelope || w.has_pending_work()))
            },
            timeout,
        );
        self.metrics
            .observe_block_ns(start.elapsed().as_nanos() as u64);
    }

    fn teardown(&mut self) {
        tracing::info!("run loop tearing down");
        self.timer.shutdown();
        self.watchdog.shutdown();
    }
}
