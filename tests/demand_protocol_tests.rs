//! Integration tests driving execution nodes by hand through the demand
//! protocol.

use sluice::element::{Chunk, RecordBatch};
use sluice::error::Error;
use sluice::exec::{self, PushReceiver, push_channel};
use sluice::operator::{IterSource, Passthrough};
use sluice::pipeline::ExecutorConfig;
use std::time::Duration;

fn chunks(sizes: &[usize]) -> Vec<Chunk> {
    sizes.iter().map(|&n| Chunk::from(vec![b'x'; n])).collect()
}

fn sizes(batch: &[Chunk]) -> Vec<usize> {
    batch.iter().map(Chunk::len).collect()
}

async fn accept_next(pushed: &mut PushReceiver<Chunk>) -> Vec<Chunk> {
    pushed.recv().await.unwrap().accept()
}

#[tokio::test]
async fn test_pull_from_standalone_source() {
    let config = ExecutorConfig::default();
    let source = exec::spawn(IterSource::new("input", chunks(&[4, 4, 4])), &config).unwrap();
    source.start(vec![]).await.unwrap();

    let pull = source.pull_handle::<Chunk>().unwrap();
    let (sink, mut pushed) = push_channel::<Chunk>("test");

    let request = tokio::spawn({
        let pull = pull.clone();
        let sink = sink.clone();
        async move { pull.pull(sink, 8, Duration::from_secs(1)).await }
    });
    assert_eq!(sizes(&accept_next(&mut pushed).await), [4, 4]);
    request.await.unwrap().unwrap();

    let request = tokio::spawn(async move { pull.pull(sink, 8, Duration::from_secs(1)).await });
    assert_eq!(sizes(&accept_next(&mut pushed).await), [4]);
    request.await.unwrap().unwrap();

    assert!(source.wait().await.is_none());
}

#[tokio::test]
async fn test_rejected_push_is_redelivered() {
    let config = ExecutorConfig::default();
    let source = exec::spawn(IterSource::new("input", chunks(&[3, 5])), &config).unwrap();
    source.start(vec![]).await.unwrap();
    let pull = source.pull_handle::<Chunk>().unwrap();
    let (sink, mut pushed) = push_channel::<Chunk>("test");

    let request = tokio::spawn({
        let pull = pull.clone();
        let sink = sink.clone();
        async move { pull.pull(sink, 100, Duration::from_secs(1)).await }
    });
    let first = pushed.recv().await.unwrap();
    assert_eq!(sizes(first.batch()), [3, 5]);
    first.reject(Error::unspecified("not now"));
    let err = request.await.unwrap().unwrap_err();
    assert_eq!(err.to_string(), "not now");

    let request = tokio::spawn(async move { pull.pull(sink, 100, Duration::from_secs(1)).await });
    assert_eq!(sizes(&accept_next(&mut pushed).await), [3, 5]);
    request.await.unwrap().unwrap();
    assert!(source.wait().await.is_none());
}

#[tokio::test]
async fn test_chain_of_standalone_nodes() {
    let config = ExecutorConfig::default();
    let source = exec::spawn(IterSource::new("input", chunks(&[1, 2, 3, 4])), &config).unwrap();
    let transform = exec::spawn(Passthrough::<Chunk>::new(), &config).unwrap();
    transform.start(vec![source.clone()]).await.unwrap();

    let pull = transform.pull_handle::<Chunk>().unwrap();
    let (sink, mut pushed) = push_channel::<Chunk>("test");
    let mut received = Vec::new();
    loop {
        let reply = pull.pull(sink.clone(), 1024, Duration::from_millis(50));
        tokio::pin!(reply);
        let result = loop {
            tokio::select! {
                Some(request) = pushed.recv() => received.extend(sizes(&request.accept())),
                result = &mut reply => break result,
            }
        };
        match result {
            Ok(()) => continue,
            // The transform exits once everything was delivered.
            Err(err) if err.is_transport() => break,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
    assert_eq!(received, [1, 2, 3, 4]);
    assert!(transform.wait().await.is_none());
    assert!(source.wait().await.is_none());
}

#[tokio::test]
async fn test_typed_handles_are_checked() {
    let config = ExecutorConfig::default();
    let source = exec::spawn(IterSource::new("input", chunks(&[1])), &config).unwrap();
    let err = source.pull_handle::<RecordBatch>().unwrap_err();
    assert!(err.is_logic());
    assert!(err.to_string().contains("produces bytes, not events"));
    assert!(source.push_handle::<Chunk>().is_err());
    source.exit(Some(Error::Silent));
}

#[tokio::test]
async fn test_exited_node_is_down() {
    let config = ExecutorConfig::default();
    let source = exec::spawn(IterSource::new("input", chunks(&[1])), &config).unwrap();
    let pull = source.pull_handle::<Chunk>().unwrap();
    source.start(vec![]).await.unwrap();

    assert!(source.exit(None));
    assert!(source.wait().await.is_none());
    assert!(!source.is_running());

    let (sink, _pushed) = push_channel::<Chunk>("test");
    let err = pull.pull(sink, 1, Duration::from_millis(10)).await.unwrap_err();
    assert!(matches!(err, Error::ReceiverDown(_)));
    assert!(!source.exit(None));
}
