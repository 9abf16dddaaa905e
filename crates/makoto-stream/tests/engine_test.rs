//! Integration tests for the stream engine: sealing, chaining, late data and
//! failure handling.

use std::{sync::Arc, time::Duration as StdDuration};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use makoto_core::{
    CollaboratorError, CollaboratorResult, EventHandler, HashAlgorithm, SealedWindow, StreamId,
    TestClock, WindowEvent, WindowId, WindowSink, WindowStore,
};
use makoto_integrity::{verify_document, IntegrityError, MemoryWindowStore, MerkleTree};
use makoto_stream::{
    EngineConfig, Record, StreamConfig, StreamEngine, StreamError, WindowAssignment, WindowSpec,
};
use parking_lot::Mutex;

fn at(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(seconds)
}

#[derive(Debug, Default)]
struct RecordingHandler {
    events: Mutex<Vec<WindowEvent>>,
}

impl RecordingHandler {
    fn sealed(&self) -> Vec<makoto_core::WindowSealedEvent> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                WindowEvent::Sealed(sealed) => Some(sealed.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, predicate: impl Fn(&WindowEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle_event(&self, event: WindowEvent) {
        self.events.lock().push(event);
    }
}

fn config(workers: usize) -> EngineConfig {
    EngineConfig::new(workers, 4, 3, StdDuration::from_secs(5)).unwrap()
}

fn tumbling(stream: &str, lateness_secs: i64) -> StreamConfig {
    StreamConfig::new(
        stream,
        WindowSpec::tumbling(Duration::minutes(1)).unwrap(),
        Duration::seconds(lateness_secs),
        None,
        HashAlgorithm::Sha256,
    )
    .unwrap()
}

async fn engine_with(
    store: Arc<MemoryWindowStore>,
    workers: usize,
) -> (StreamEngine, Arc<RecordingHandler>) {
    let handler = Arc::new(RecordingHandler::default());
    let mut engine =
        StreamEngine::new(store, config(workers), Arc::new(TestClock::new()), handler.clone());
    engine.start().await.unwrap();
    (engine, handler)
}

#[tokio::test]
async fn sealed_windows_form_a_chain() {
    let store = Arc::new(MemoryWindowStore::new());
    let (engine, handler) = engine_with(store.clone(), 3).await;
    let stream = StreamId::from("sensors");
    engine.register_stream(tumbling("sensors", 0)).unwrap();

    for minute in 0..5 {
        for i in 0..4 {
            let payload = format!("m{minute}-r{i}");
            engine.ingest(&stream, &Record::new(payload, at(minute * 60 + i))).unwrap();
        }
    }
    let closed = engine.advance_watermark(&stream, at(301)).unwrap();
    assert_eq!(closed.len(), 5);
    engine.shutdown().await.unwrap();

    let chain = store.chain(&stream);
    assert_eq!(chain.len(), 5);
    for (k, window) in chain.iter().enumerate() {
        assert_eq!(window.chain.chain_length, k as u64 + 1);
        assert_eq!(window.tree.leaf_count, 4);
        assert_eq!(window.chain.genesis_window_id, chain[0].window_id);
        if k > 0 {
            assert_eq!(window.chain.previous_merkle_root, Some(chain[k - 1].tree.root));
        }
    }
    assert_eq!(handler.sealed().len(), 5);
}

#[tokio::test]
async fn sealed_root_matches_records_in_arrival_order() {
    let store = Arc::new(MemoryWindowStore::new());
    let (engine, _handler) = engine_with(store.clone(), 1).await;
    let stream = StreamId::from("s");
    engine.register_stream(tumbling("s", 0)).unwrap();

    let payloads = ["c", "a", "d", "b"];
    for (i, payload) in payloads.iter().enumerate() {
        engine.ingest(&stream, &Record::new(*payload, at(50 - i as i64))).unwrap();
    }
    engine.flush(&stream).unwrap();
    engine.shutdown().await.unwrap();

    let expected = MerkleTree::from_records(&payloads, HashAlgorithm::Sha256).unwrap();
    let sealed = &store.chain(&stream)[0];
    assert_eq!(sealed.tree.root, expected.root());
    assert_eq!(sealed.tree.height, expected.height());
}

#[tokio::test]
async fn sample_proofs_verify_against_sealed_root() {
    let store = Arc::new(MemoryWindowStore::new());
    let (engine, handler) = engine_with(store, 2).await;
    let stream = StreamId::from("s");
    engine.register_stream(tumbling("s", 0)).unwrap();

    for i in 0..11 {
        engine.ingest(&stream, &Record::new(vec![i as u8], at(i))).unwrap();
    }
    engine.flush(&stream).unwrap();
    engine.shutdown().await.unwrap();

    let sealed = handler.sealed().remove(0);
    assert_eq!(sealed.sample_proofs.len(), 3);
    for proof in &sealed.sample_proofs {
        assert!(verify_document(proof, &sealed.window.tree.root, HashAlgorithm::Sha256).unwrap());
    }
    assert_eq!(sealed.descriptor.duration, "PT1M");
}

#[tokio::test]
async fn sliding_record_is_sealed_into_both_windows() {
    let store = Arc::new(MemoryWindowStore::new());
    let (engine, _handler) = engine_with(store.clone(), 2).await;
    let stream = StreamId::from("s");
    let config = StreamConfig::new(
        "s",
        WindowSpec::sliding(Duration::minutes(1), Duration::seconds(30)).unwrap(),
        Duration::zero(),
        None,
        HashAlgorithm::Sha256,
    )
    .unwrap();
    engine.register_stream(config).unwrap();

    let assignment = engine.ingest(&stream, &Record::new("x", at(45))).unwrap();
    let windows: Vec<(DateTime<Utc>, DateTime<Utc>)> =
        assignment.windows().iter().map(|w| (w.start(), w.end())).collect();
    assert_eq!(windows, vec![(at(0), at(60)), (at(30), at(90))]);

    engine.advance_watermark(&stream, at(91)).unwrap();
    engine.shutdown().await.unwrap();

    let chain = store.chain(&stream);
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[0].tree.root, chain[1].tree.root);
    assert_eq!(chain[1].chain.previous_window_id.as_ref(), Some(&chain[0].window_id));
}

#[tokio::test]
async fn late_record_beyond_lateness_is_dropped_and_counted() {
    let store = Arc::new(MemoryWindowStore::new());
    let (engine, handler) = engine_with(store.clone(), 1).await;
    let stream = StreamId::from("s");
    engine.register_stream(tumbling("s", 5)).unwrap();

    engine.ingest(&stream, &Record::new("a", at(10))).unwrap();
    engine.ingest(&stream, &Record::new("b", at(20))).unwrap();
    engine.advance_watermark(&stream, at(75)).unwrap();

    let late = engine.ingest(&stream, &Record::new("straggler", at(30))).unwrap();
    let WindowAssignment::LateRecordDropped(dropped) = late else {
        panic!("expected the straggler to be dropped");
    };
    assert_eq!(dropped.dropped_total, 1);
    assert_eq!(engine.metrics(&stream).unwrap().dropped_records, 1);

    engine.ingest(&stream, &Record::new("next", at(80))).unwrap();
    engine.flush(&stream).unwrap();
    engine.shutdown().await.unwrap();

    let chain = store.chain(&stream);
    let expected = MerkleTree::from_records(&["a", "b"], HashAlgorithm::Sha256).unwrap();
    assert_eq!(chain[0].tree.root, expected.root());
    assert_eq!(chain[0].dropped_records, 0);
    assert_eq!(chain[1].dropped_records, 1);
    assert_eq!(handler.count(|e| matches!(e, WindowEvent::RecordDropped(_))), 1);
}

#[tokio::test]
async fn streams_are_chained_independently() {
    let store = Arc::new(MemoryWindowStore::new());
    let (engine, _handler) = engine_with(store.clone(), 4).await;
    let streams: Vec<StreamId> = (0..3).map(|i| StreamId::from(format!("s{i}"))).collect();
    for stream in &streams {
        engine.register_stream(tumbling(stream.as_str(), 0)).unwrap();
    }

    for minute in 0..10 {
        for stream in &streams {
            let record = Record::new(stream.as_str().to_owned(), at(minute * 60));
            engine.ingest(stream, &record).unwrap();
        }
    }
    for stream in &streams {
        engine.advance_watermark(stream, at(601)).unwrap();
    }
    engine.shutdown().await.unwrap();

    for stream in &streams {
        let lengths: Vec<u64> = store.chain(stream).iter().map(|w| w.chain.chain_length).collect();
        assert_eq!(lengths, (1..=10).collect::<Vec<u64>>());
    }
}

/// Store rejecting the first write for one window.
#[derive(Debug)]
struct FlakyStore {
    inner: MemoryWindowStore,
    reject: WindowId,
}

#[async_trait]
impl WindowStore for FlakyStore {
    async fn get(&self, window_id: &WindowId) -> CollaboratorResult<Option<SealedWindow>> {
        self.inner.get(window_id).await
    }
}

#[async_trait]
impl WindowSink for FlakyStore {
    async fn put(&self, window: SealedWindow) -> CollaboratorResult<()> {
        if window.window_id == self.reject {
            return Err(CollaboratorError::unavailable("disk full"));
        }
        self.inner.put(window).await
    }
}

#[tokio::test]
async fn failed_window_releases_successor_which_fails_to_link() {
    let stream = StreamId::from("s");
    let reject = WindowId::new(stream.clone(), at(60), at(120)).unwrap();
    let store = Arc::new(FlakyStore { inner: MemoryWindowStore::new(), reject });
    let handler = Arc::new(RecordingHandler::default());
    let mut engine =
        StreamEngine::new(store.clone(), config(2), Arc::new(TestClock::new()), handler.clone());
    engine.start().await.unwrap();
    engine.register_stream(tumbling("s", 0)).unwrap();

    for minute in 0..3 {
        engine.ingest(&stream, &Record::new("r", at(minute * 60))).unwrap();
    }
    engine.advance_watermark(&stream, at(181)).unwrap();
    engine.shutdown().await.unwrap();

    assert_eq!(store.inner.len(), 1);
    let failures: Vec<String> = handler
        .events
        .lock()
        .iter()
        .filter_map(|e| match e {
            WindowEvent::SealFailed(f) => Some(f.error_message.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().any(|m| m.contains("disk full")));
    assert!(failures.iter().any(|m| m.contains(
        &IntegrityError::UnknownPreviousWindow {
            window_id: WindowId::new(stream.clone(), at(60), at(120)).unwrap()
        }
        .to_string()
    )));
}

/// Store whose writes never complete.
#[derive(Debug, Default)]
struct StalledStore;

#[async_trait]
impl WindowStore for StalledStore {
    async fn get(&self, _window_id: &WindowId) -> CollaboratorResult<Option<SealedWindow>> {
        Ok(None)
    }
}

#[async_trait]
impl WindowSink for StalledStore {
    async fn put(&self, _window: SealedWindow) -> CollaboratorResult<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[tokio::test]
async fn shutdown_times_out_when_store_stalls() {
    let config = EngineConfig::new(1, 4, 0, StdDuration::from_millis(50)).unwrap();
    let mut engine = StreamEngine::new(
        Arc::new(StalledStore),
        config,
        Arc::new(TestClock::new()),
        Arc::new(RecordingHandler::default()),
    );
    engine.start().await.unwrap();
    let stream = StreamId::from("s");
    engine.register_stream(tumbling("s", 0)).unwrap();
    engine.ingest(&stream, &Record::new("r", at(0))).unwrap();
    engine.flush(&stream).unwrap();

    assert!(matches!(engine.shutdown().await, Err(StreamError::ShutdownTimeout { .. })));
}

#[tokio::test]
async fn starting_twice_is_rejected() {
    let (mut engine, _handler) = engine_with(Arc::new(MemoryWindowStore::new()), 1).await;
    assert!(matches!(engine.start().await, Err(StreamError::AlreadyStarted)));
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn windows_closed_before_start_are_sealed_after_start() {
    let store = Arc::new(MemoryWindowStore::new());
    let mut engine = StreamEngine::new(
        store.clone(),
        config(1),
        Arc::new(TestClock::new()),
        Arc::new(RecordingHandler::default()),
    );
    let stream = StreamId::from("s");
    engine.register_stream(tumbling("s", 0)).unwrap();
    engine.ingest(&stream, &Record::new("r", at(0))).unwrap();
    engine.flush(&stream).unwrap();

    engine.start().await.unwrap();
    engine.shutdown().await.unwrap();

    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn stats_count_sealed_windows() {
    let store = Arc::new(MemoryWindowStore::new());
    let (engine, _handler) = engine_with(store, 2).await;
    let stream = StreamId::from("s");
    engine.register_stream(tumbling("s", 0)).unwrap();
    for minute in 0..3 {
        engine.ingest(&stream, &Record::new("r", at(minute * 60))).unwrap();
    }
    engine.advance_watermark(&stream, at(181)).unwrap();

    let mut stats = engine.stats().await;
    for _ in 0..200 {
        if stats.windows_sealed == 3 {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        stats = engine.stats().await;
    }
    assert_eq!(engine.sealed_through(&stream), 3);
    assert_eq!(stats.windows_sealed, 3);
    assert_eq!(stats.seal_failures, 0);
    assert_eq!(stats.active_workers, 2);
    engine.shutdown().await.unwrap();
}
