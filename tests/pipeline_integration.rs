//! Integration tests for complete pipelines.

use sluice::diagnostics::{self, Severity};
use sluice::element::{Chunk, RecordBatch, Value, Void};
use sluice::error::{Error, Result};
use sluice::observability::metrics_channel;
use sluice::operator::{BoxGenerator, ControlPlane, Generator, Operator, Step, from_fn};
use sluice::pipeline::{ExecutorConfig, Pipeline, PipelineEvent, PipelineExecutor};
use sluice::prelude::{Collect, Discard, IterSource, Passthrough, ReadLines};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn chunks(parts: &[&'static str]) -> Vec<Chunk> {
    parts.iter().map(|part| Chunk::from(*part)).collect()
}

fn lines(batches: &[RecordBatch]) -> Vec<String> {
    batches
        .iter()
        .flat_map(|batch| (0..batch.num_rows()).map(move |row| batch.value(row, "line").cloned()))
        .map(|value| match value {
            Some(Value::String(text)) => text.to_string(),
            other => panic!("unexpected value {:?}", other),
        })
        .collect()
}

/// Deliver under-full batches after 5 ms instead of 250 ms.
fn short_timeout() -> ExecutorConfig {
    ExecutorConfig::default().with_batch_timeout(Duration::from_millis(5))
}

/// A source that never finishes.
struct Endless;

impl Operator for Endless {
    type Input = Void;
    type Output = Chunk;

    fn name(&self) -> &str {
        "endless"
    }

    fn instantiate(&mut self, _ctrl: &mut ControlPlane) -> Result<BoxGenerator<Void, Chunk>> {
        Ok(from_fn(|_input, _ctrl| Step::Yield(Chunk::from("x"))))
    }
}

/// Fails on the first chunk containing `bad`.
struct FailOn;

impl Operator for FailOn {
    type Input = Chunk;
    type Output = Chunk;

    fn name(&self) -> &str {
        "fail_on"
    }

    fn instantiate(&mut self, _ctrl: &mut ControlPlane) -> Result<BoxGenerator<Chunk, Chunk>> {
        Ok(from_fn::<Chunk, Chunk, _>(|input, ctrl| match input.next() {
            Step::Yield(chunk) if chunk.as_bytes() == b"bad" => {
                ctrl.abort(Error::unspecified("found a bad chunk"));
                Step::Pending
            }
            step => step,
        }))
    }
}

#[tokio::test]
async fn test_source_passthrough_sink() {
    let (sink, collected) = Collect::<Chunk>::new();
    let pipeline = Pipeline::new("passthrough")
        .then(IterSource::new("input", chunks(&["hello", " ", "world"])))
        .then(Passthrough::<Chunk>::new())
        .then(sink);

    PipelineExecutor::new().run(pipeline).await.unwrap();

    let data: Vec<u8> = collected
        .take()
        .iter()
        .flat_map(|chunk| chunk.as_bytes().to_vec())
        .collect();
    assert_eq!(data, b"hello world");
}

#[tokio::test]
async fn test_read_lines_pipeline() {
    let (sink, collected) = Collect::<RecordBatch>::new();
    let pipeline = Pipeline::new("lines")
        .then(IterSource::new("input", chunks(&["a\nb", "c\r\n", "d"])))
        .then(ReadLines::new())
        .then(sink);

    PipelineExecutor::new().run(pipeline).await.unwrap();

    assert_eq!(collected.size(), 3);
    assert_eq!(lines(&collected.take()), ["a", "bc", "d"]);
}

#[tokio::test]
async fn test_long_pipeline() {
    let input: Vec<Chunk> = (0..500).map(|i| Chunk::from(format!("{i}\n").into_bytes())).collect();
    let sink = Discard::<RecordBatch>::new();
    let consumed = sink.consumed();
    let pipeline = Pipeline::new("long")
        .then(IterSource::new("input", input))
        .then(Passthrough::<Chunk>::with_name("p1"))
        .then(Passthrough::<Chunk>::with_name("p2"))
        .then(ReadLines::new())
        .then(Passthrough::<RecordBatch>::with_name("p3"))
        .then(sink);

    PipelineExecutor::new().run(pipeline).await.unwrap();
    assert_eq!(consumed.load(Ordering::Relaxed), 500);
}

#[tokio::test]
async fn test_optimized_pipeline_runs() {
    let (sink, collected) = Collect::<RecordBatch>::new();
    let mut pipeline = Pipeline::new("optimized")
        .then(IterSource::new("input", chunks(&["x\ny\n"])))
        .then(Passthrough::<Chunk>::new())
        .then(ReadLines::new())
        .then(Passthrough::<RecordBatch>::new())
        .then(sink);

    pipeline.optimize();
    assert_eq!(pipeline.names(), ["input", "read_lines", "collect"]);

    PipelineExecutor::new().run(pipeline).await.unwrap();
    assert_eq!(lines(&collected.take()), ["x", "y"]);
}

#[tokio::test]
async fn test_pipeline_validation_errors() {
    let executor = PipelineExecutor::new();

    let err = executor.run(Pipeline::new("empty")).await.unwrap_err();
    assert!(err.is_logic());

    let pipeline = Pipeline::new("mismatch")
        .then(IterSource::new("input", chunks(&["a"])))
        .then(Discard::<RecordBatch>::new());
    let err = executor.run(pipeline).await.unwrap_err();
    assert!(err.is_logic());
    assert!(err.to_string().contains("'input' produces bytes but 'discard' consumes events"));
}

#[tokio::test]
async fn test_operator_error_fails_pipeline() {
    let (handler, diagnostics) = diagnostics::channel();
    let config = ExecutorConfig::default().with_diagnostics(Arc::new(handler));
    let pipeline = Pipeline::new("failing")
        .then(IterSource::new("input", chunks(&["good", "bad", "good"])))
        .then(FailOn)
        .then(Discard::<Chunk>::new());

    let mut handle = PipelineExecutor::with_config(config).start(pipeline).await.unwrap();
    let mut events = handle.events().unwrap();
    let err = handle.wait().await.unwrap_err();
    assert!(err.to_string().contains("found a bad chunk"));

    // The error is reported exactly once.
    let mut errors = Vec::new();
    while let Some(event) = events.try_recv() {
        if let PipelineEvent::Error { message, node } = event {
            errors.push((message, node));
        }
    }
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].1.as_deref(), Some("fail_on"));

    let reported: Vec<_> = std::iter::from_fn(|| diagnostics.try_recv().ok().flatten())
        .filter(|diagnostic| diagnostic.severity() == Severity::Error)
        .collect();
    assert_eq!(reported.len(), 1);
    assert!(reported[0].notes().iter().any(|note| note.contains("fail_on")));
}

/// Fails while being instantiated.
struct Broken;

impl Operator for Broken {
    type Input = Chunk;
    type Output = Void;

    fn name(&self) -> &str {
        "broken"
    }

    fn instantiate(&mut self, _ctrl: &mut ControlPlane) -> Result<BoxGenerator<Chunk, Void>> {
        Err(Error::unspecified("cannot open output"))
    }
}

#[tokio::test]
async fn test_instantiate_error_fails_start() {
    let pipeline = Pipeline::new("broken")
        .then(IterSource::new("input", chunks(&["a"])))
        .then(Broken);
    let err = PipelineExecutor::new().start(pipeline).await.err().unwrap();
    assert!(err.to_string().contains("failed to instantiate operator: cannot open output"));
}

#[tokio::test]
async fn test_pipeline_abort() {
    let sink = Discard::<Chunk>::new();
    let consumed = sink.consumed();
    let pipeline = Pipeline::new("endless").then(Endless).then(sink);

    let mut handle = PipelineExecutor::with_config(short_timeout())
        .start(pipeline)
        .await
        .unwrap();
    let mut events = handle.events().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.abort();

    let err = handle.wait().await.unwrap_err();
    assert!(err.is_silent());
    assert!(consumed.load(Ordering::Relaxed) > 0);

    let mut stopped = false;
    while let Some(event) = events.try_recv() {
        match event {
            PipelineEvent::Stopped => stopped = true,
            PipelineEvent::Error { .. } | PipelineEvent::Eos => panic!("unexpected {event}"),
            _ => {}
        }
    }
    assert!(stopped);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let sink = Discard::<Chunk>::new();
    let consumed = sink.consumed();
    let pipeline = Pipeline::new("pausable").then(Endless).then(sink);
    let handle = PipelineExecutor::with_config(short_timeout())
        .start(pipeline)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.pause();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let paused = consumed.load(Ordering::Relaxed);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(consumed.load(Ordering::Relaxed), paused);

    handle.resume();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(consumed.load(Ordering::Relaxed) > paused);

    handle.abort();
    assert!(handle.wait().await.unwrap_err().is_silent());
}

/// A source whose elements are produced on a background thread.
struct Background {
    items: Vec<&'static str>,
}

impl Operator for Background {
    type Input = Void;
    type Output = Chunk;

    fn name(&self) -> &str {
        "background"
    }

    fn instantiate(&mut self, ctrl: &mut ControlPlane) -> Result<BoxGenerator<Void, Chunk>> {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let wakeup = ctrl.wakeup();
        let items = std::mem::take(&mut self.items);
        {
            let queue = Arc::clone(&queue);
            let closed = Arc::clone(&closed);
            std::thread::spawn(move || {
                for item in items {
                    std::thread::sleep(Duration::from_millis(5));
                    queue.lock().unwrap().push_back(Chunk::from(item));
                    wakeup.wake();
                }
                closed.store(true, Ordering::Release);
                wakeup.wake();
            });
        }
        Ok(from_fn(move |_input, ctrl| {
            let finished = closed.load(Ordering::Acquire);
            if let Some(chunk) = queue.lock().unwrap().pop_front() {
                return Step::Yield(chunk);
            }
            if finished {
                return Step::Done;
            }
            ctrl.set_waiting(true);
            Step::Pending
        }))
    }
}

#[tokio::test]
async fn test_waiting_source_is_woken_up() {
    let (sink, collected) = Collect::<Chunk>::new();
    let pipeline = Pipeline::new("background")
        .then(Background {
            items: vec!["a", "b", "c", "d"],
        })
        .then(sink);

    PipelineExecutor::new().run(pipeline).await.unwrap();
    assert_eq!(collected.size(), 4);
}

/// Runs on its own thread.
struct Blocking(IterSource<Chunk>);

impl Operator for Blocking {
    type Input = Void;
    type Output = Chunk;

    fn name(&self) -> &str {
        "blocking"
    }

    fn instantiate(&mut self, ctrl: &mut ControlPlane) -> Result<BoxGenerator<Void, Chunk>> {
        let mut inner = self.0.instantiate(ctrl)?;
        Ok(from_fn(move |input, ctrl| {
            std::thread::sleep(Duration::from_millis(1));
            inner.resume(input, ctrl)
        }))
    }

    fn detached(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn test_detached_operator() {
    let (sink, collected) = Collect::<Chunk>::new();
    let pipeline = Pipeline::new("detached")
        .then(Blocking(IterSource::new("input", chunks(&["ab", "cd", "ef"]))))
        .then(sink);

    PipelineExecutor::new().run(pipeline).await.unwrap();
    assert_eq!(collected.size(), 6);
}

#[tokio::test]
async fn test_metrics_are_reported() {
    let (sender, receiver) = metrics_channel();
    let config = ExecutorConfig::default().with_metrics(sender);
    let (sink, _) = Collect::<Chunk>::new();
    let pipeline = Pipeline::new("metered")
        .then(IterSource::new("input", chunks(&["abc", "de"])))
        .then(sink);

    PipelineExecutor::with_config(config).run(pipeline).await.unwrap();

    let mut last = std::collections::HashMap::new();
    while let Ok(Some(metric)) = receiver.try_recv() {
        last.insert(metric.name.clone(), metric);
    }
    let source = &last["input"];
    assert_eq!(source.outbound_elements, 5);
    assert_eq!(source.outbound_unit, "bytes");
    let sink = &last["collect"];
    assert_eq!(sink.inbound_elements, 5);
    assert_eq!(sink.index, 1);
}

#[tokio::test]
async fn test_event_stream_ends_with_eos() {
    use futures::StreamExt;

    let (sink, _) = Collect::<Chunk>::new();
    let pipeline = Pipeline::new("stream")
        .then(IterSource::new("input", chunks(&["a"])))
        .then(sink);
    let handle = PipelineExecutor::new().start(pipeline).await.unwrap();
    let events = handle.subscribe();
    handle.wait().await.unwrap();

    let mut stream = sluice::pipeline::EventStream::new(events);
    let mut saw_eos = false;
    while let Some(event) = tokio::time::timeout(Duration::from_millis(100), stream.next())
        .await
        .ok()
        .flatten()
    {
        if matches!(event, PipelineEvent::Eos) {
            saw_eos = true;
            break;
        }
    }
    assert!(saw_eos);
}
