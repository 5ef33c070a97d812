//! Integration tests for backpressure and flow control.
//!
//! These tests verify that:
//! - A stalled sink stops the source once the buffers are full
//! - Buffers stay within the configured demand limits
//! - Many tiny elements are bounded by count, not only by size
//! - Operator overrides of the limits take effect

use sluice::element::{Chunk, Element, Void};
use sluice::error::Result;
use sluice::exec::DemandLimits;
use sluice::operator::{BoxGenerator, ControlPlane, DemandSettings, Operator, Step, from_fn};
use sluice::pipeline::{ExecutorConfig, Pipeline, PipelineExecutor};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Emits `count` one-byte chunks and counts what it produced.
struct Counted {
    count: u64,
    produced: Arc<AtomicU64>,
}

impl Operator for Counted {
    type Input = Void;
    type Output = Chunk;

    fn name(&self) -> &str {
        "counted"
    }

    fn instantiate(&mut self, _ctrl: &mut ControlPlane) -> Result<BoxGenerator<Void, Chunk>> {
        let produced = Arc::clone(&self.produced);
        let count = self.count;
        Ok(from_fn(move |_input, _ctrl| {
            if produced.load(Ordering::Relaxed) == count {
                return Step::Done;
            }
            produced.fetch_add(1, Ordering::Relaxed);
            Step::Yield(Chunk::from("x"))
        }))
    }
}

/// A sink that only consumes while its gate is open.
struct Gated {
    open: Arc<AtomicBool>,
    consumed: Arc<AtomicU64>,
    demand: DemandSettings,
}

impl Operator for Gated {
    type Input = Chunk;
    type Output = Void;

    fn name(&self) -> &str {
        "gated"
    }

    fn instantiate(&mut self, _ctrl: &mut ControlPlane) -> Result<BoxGenerator<Chunk, Void>> {
        let open = Arc::clone(&self.open);
        let consumed = Arc::clone(&self.consumed);
        Ok(from_fn::<Chunk, Void, _>(move |input, _ctrl| {
            if !open.load(Ordering::Relaxed) {
                return Step::Pending;
            }
            match input.next() {
                Step::Yield(chunk) => {
                    consumed.fetch_add(chunk.size(), Ordering::Relaxed);
                    Step::Pending
                }
                Step::Pending => Step::Pending,
                Step::Done => Step::Done,
            }
        }))
    }

    fn demand(&self) -> DemandSettings {
        self.demand
    }
}

struct Setup {
    produced: Arc<AtomicU64>,
    consumed: Arc<AtomicU64>,
    open: Arc<AtomicBool>,
    pipeline: Pipeline,
}

fn setup(count: u64, demand: DemandSettings) -> Setup {
    let produced = Arc::new(AtomicU64::new(0));
    let consumed = Arc::new(AtomicU64::new(0));
    let open = Arc::new(AtomicBool::new(false));
    let pipeline = Pipeline::new("backpressure")
        .then(Counted {
            count,
            produced: Arc::clone(&produced),
        })
        .then(Gated {
            open: Arc::clone(&open),
            consumed: Arc::clone(&consumed),
            demand,
        });
    Setup {
        produced,
        consumed,
        open,
        pipeline,
    }
}

fn small_limits() -> ExecutorConfig {
    let limits = DemandLimits::new(16, 0, 64, Duration::from_millis(10)).with_max_batches(1024);
    ExecutorConfig::default()
        .with_bytes_limits(limits)
        .with_steps_per_run(4)
}

#[tokio::test(start_paused = true)]
async fn test_stalled_sink_stops_source() {
    let setup = setup(1000, DemandSettings::default());
    let handle = PipelineExecutor::with_config(small_limits())
        .start(setup.pipeline)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    let stalled = setup.produced.load(Ordering::Relaxed);
    // Both the outbound buffer of the source and the inbound buffer of
    // the sink are full.
    assert!(stalled >= 64, "produced only {stalled}");
    assert!(stalled <= 2 * 64 + 4, "produced {stalled}");
    assert_eq!(setup.consumed.load(Ordering::Relaxed), 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(setup.produced.load(Ordering::Relaxed), stalled);

    setup.open.store(true, Ordering::Relaxed);
    handle.wait().await.unwrap();
    assert_eq!(setup.produced.load(Ordering::Relaxed), 1000);
    assert_eq!(setup.consumed.load(Ordering::Relaxed), 1000);
}

#[tokio::test(start_paused = true)]
async fn test_operator_limits_override_config() {
    let demand = DemandSettings {
        max_buffered: Some(8),
        max_batch_size: Some(4),
        ..Default::default()
    };
    let setup = setup(100, demand);
    let handle = PipelineExecutor::with_config(small_limits())
        .start(setup.pipeline)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    let stalled = setup.produced.load(Ordering::Relaxed);
    // The source still buffers up to 64, the sink only 8.
    assert!(stalled >= 8, "produced only {stalled}");
    assert!(stalled <= 64 + 8 + 4, "produced {stalled}");

    setup.open.store(true, Ordering::Relaxed);
    handle.wait().await.unwrap();
    assert_eq!(setup.consumed.load(Ordering::Relaxed), 100);
}

#[tokio::test(start_paused = true)]
async fn test_element_count_bounds_tiny_chunks() {
    let setup = setup(1000, DemandSettings::default());
    let config = ExecutorConfig::default()
        .with_bytes_limits(DemandLimits::new(16, 0, 1024, Duration::from_millis(10)))
        .with_steps_per_run(4);
    let handle = PipelineExecutor::with_config(config)
        .start(setup.pipeline)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    let stalled = setup.produced.load(Ordering::Relaxed);
    // Far below the 1024 byte limits: the sink stops pulling once it holds
    // 20 chunks, the source stops producing once it holds 20.
    assert!(stalled >= 40, "produced only {stalled}");
    assert!(stalled <= 20 + 16 + 20, "produced {stalled}");

    setup.open.store(true, Ordering::Relaxed);
    handle.wait().await.unwrap();
    assert_eq!(setup.consumed.load(Ordering::Relaxed), 1000);
}

#[tokio::test]
async fn test_fast_pipeline_with_tiny_buffers() {
    let setup = setup(2000, DemandSettings::default());
    setup.open.store(true, Ordering::Relaxed);
    let config = ExecutorConfig::default()
        .with_bytes_limits(DemandLimits::new(1, 0, 1, Duration::from_millis(1)))
        .with_steps_per_run(1);

    PipelineExecutor::with_config(config)
        .run(setup.pipeline)
        .await
        .unwrap();
    assert_eq!(setup.consumed.load(Ordering::Relaxed), 2000);
}
