use std::collections::VecDeque;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use criterion::{black_box, Criterion};

use spark_runloop::{
    Callback, CallbackFactory, Coordinator, Envelope, MultiplexedConsumer, NoopMetricsSink,
    OffsetManager, Partition, RunLoopBuilder, RunLoopConfig, TokioTaskExecutor, UserTask,
};

#[derive(Debug)]
struct BenchEnvelope {
    partition: Partition,
    offset: u64,
}

impl Envelope for BenchEnvelope {
    fn partition(&self) -> &Partition {
        &self.partition
    }

    fn offset(&self) -> u64 {
        self.offset
    }
}

struct FixedConsumer {
    queue: Mutex<VecDeque<Arc<BenchEnvelope>>>,
}

impl FixedConsumer {
    fn new(count: u64) -> Self {
        let partition = Partition::from("bench");
        let queue = (0..count)
            .map(|offset| {
                Arc::new(BenchEnvelope {
                    partition: partition.clone(),
                    offset,
                })
            })
            .collect();
        Self {
            queue: Mutex::new(queue),
        }
    }
}

impl MultiplexedConsumer<BenchEnvelope> for FixedConsumer {
    fn choose(&self) -> Result<Option<Arc<BenchEnvelope>>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.queue.lock().unwrap().pop_front())
    }

    fn try_update(&self, _partition: &Partition) {}

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(1)
    }
}

struct DiscardingOffsets;

impl OffsetManager for DiscardingOffsets {
    fn update(
        &self,
        _task: &str,
        _partition: &Partition,
        _offset: u64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// Does nothing but succeed immediately — isolates dispatch/reorder/commit
/// overhead from whatever a real task would otherwise spend time on.
struct PassThroughTask {
    partitions: [Partition; 1],
    done: Arc<AtomicU64>,
}

#[async_trait]
impl UserTask<BenchEnvelope> for PassThroughTask {
    fn task_name(&self) -> &str {
        "bench-passthrough"
    }

    fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    async fn process(
        &self,
        envelope: Arc<BenchEnvelope>,
        coordinator: Coordinator,
        callback: CallbackFactory<BenchEnvelope>,
    ) {
        let handle: Callback<BenchEnvelope> = callback.new_handle(coordinator);
        black_box(&envelope);
        self.done.fetch_add(1, Ordering::Relaxed);
        handle.success();
    }
}

/// Drives `count` envelopes through a single task end to end and blocks
/// until every one of them has committed, measuring wall-clock throughput
/// of the full choose -> dispatch -> complete -> reorder -> commit path.
fn bench_dispatch_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build bench runtime");

    c.bench_function("dispatch_throughput_1k", |b| {
        b.iter(|| {
            let count = 1_000;
            let consumer = Arc::new(FixedConsumer::new(count));
            let offsets = Arc::new(DiscardingOffsets);
            let executor = Arc::new(TokioTaskExecutor::new(rt.handle().clone()));
            let config = RunLoopConfig::try_new(32).unwrap();
            let done = Arc::new(AtomicU64::new(0));
            let task = Arc::new(PassThroughTask {
                partitions: [Partition::from("bench")],
                done: done.clone(),
            });

            let (run_loop, handle) = RunLoopBuilder::new(consumer, offsets, executor, config)
                .with_metrics(Arc::new(NoopMetricsSink))
                .task(task)
                .build()
                .expect("valid run loop configuration");

            let join = run_loop.spawn();
            while done.load(Ordering::Relaxed) < count {
                std::thread::sleep(Duration::from_micros(200));
            }
            handle.shutdown();
            let report = join.join().expect("run loop thread panicked");
            black_box(report.is_clean_shutdown());
        });
    });
}

fn main() {
    let mut quick_mode = false;
    for arg in env::args().skip(1) {
        if arg == "--quick" {
            quick_mode = true;
        }
    }

    let mut criterion = Criterion::default();
    if quick_mode {
        criterion = criterion
            .sample_size(10)
            .warm_up_time(Duration::from_millis(100))
            .measurement_time(Duration::from_millis(250));
    }

    bench_dispatch_throughput(&mut criterion);
    criterion.final_summary();
}
