//! Integration tests for window chain linking and link checking.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use makoto_core::{
    ChainLink, Digest, HashAlgorithm, SealedWindow, StreamId, WindowId, WindowKind, WindowSink,
};
use makoto_integrity::{hasher, ChainLinker, IntegrityError, MemoryWindowStore, MerkleTree};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

fn window_id(stream: &str, index: i64) -> WindowId {
    let from = start() + Duration::minutes(index);
    WindowId::new(StreamId::from(stream), from, from + Duration::minutes(1)).unwrap()
}

fn sealed(window_id: WindowId, chain: ChainLink, seed: u8) -> SealedWindow {
    let tree = MerkleTree::build(
        vec![hasher::leaf_hash(HashAlgorithm::Sha256, &[seed])],
        HashAlgorithm::Sha256,
    )
    .unwrap();
    SealedWindow {
        kind: WindowKind::Tumbling,
        tree: tree.head(),
        chain,
        late_records: 0,
        dropped_records: 0,
        first_event_at: window_id.start(),
        last_event_at: window_id.start(),
        sealed_at: window_id.end(),
        window_id,
    }
}

/// Links and persists `count` consecutive windows, returning them in order.
async fn build_chain(
    linker: &ChainLinker,
    store: &MemoryWindowStore,
    stream: &str,
    count: i64,
) -> Vec<SealedWindow> {
    let mut windows: Vec<SealedWindow> = Vec::new();
    for i in 0..count {
        let id = window_id(stream, i);
        let previous = windows.last().map(|w| w.window_id.clone());
        let link = linker.link(&id, previous.as_ref()).await.unwrap();
        let window = sealed(id, link, u8::try_from(i).unwrap());
        store.put(window.clone()).await.unwrap();
        windows.push(window);
    }
    windows
}

#[tokio::test]
async fn chain_lengths_increase_and_roots_link_back() {
    let store = Arc::new(MemoryWindowStore::new());
    let linker = ChainLinker::new(store.clone());

    let windows = build_chain(&linker, &store, "sensors", 5).await;

    for (k, window) in windows.iter().enumerate() {
        assert_eq!(window.chain.chain_length, k as u64 + 1);
        assert_eq!(window.chain.genesis_window_id, windows[0].window_id);
        if k > 0 {
            assert_eq!(window.chain.previous_merkle_root, Some(windows[k - 1].tree.root));
            assert_eq!(window.chain.previous_window_id.as_ref(), Some(&windows[k - 1].window_id));
        } else {
            assert!(window.chain.is_genesis());
        }
        linker.check(&window.window_id, &window.chain).await.unwrap();
    }
    assert_eq!(store.chain(&StreamId::from("sensors")), windows);
}

#[tokio::test]
async fn missing_previous_window_is_reported() {
    let store = Arc::new(MemoryWindowStore::new());
    let linker = ChainLinker::new(store);

    let err = linker.link(&window_id("s", 1), Some(&window_id("s", 0))).await.unwrap_err();
    assert!(matches!(err, IntegrityError::UnknownPreviousWindow { .. }));
    assert!(err.is_integrity_error());
}

#[tokio::test]
async fn cross_stream_link_is_rejected() {
    let store = Arc::new(MemoryWindowStore::new());
    let linker = ChainLinker::new(store.clone());
    build_chain(&linker, &store, "a", 1).await;

    let err = linker.link(&window_id("b", 1), Some(&window_id("a", 0))).await.unwrap_err();
    assert!(matches!(err, IntegrityError::BrokenChainLink { .. }));
}

#[tokio::test]
async fn sealed_windows_are_append_only() {
    let store = Arc::new(MemoryWindowStore::new());
    let linker = ChainLinker::new(store.clone());
    let windows = build_chain(&linker, &store, "s", 1).await;

    let rewrite = sealed(windows[0].window_id.clone(), windows[0].chain.clone(), 99);
    assert!(store.put(rewrite).await.is_err());
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn check_detects_tampered_root_and_length() {
    let store = Arc::new(MemoryWindowStore::new());
    let linker = ChainLinker::new(store.clone());
    let windows = build_chain(&linker, &store, "s", 3).await;
    let last = &windows[2];

    let forged_root = ChainLink {
        previous_merkle_root: Some(Digest::from([0xee; 32])),
        ..last.chain.clone()
    };
    assert!(matches!(
        linker.check(&last.window_id, &forged_root).await,
        Err(IntegrityError::BrokenChainLink { .. })
    ));

    let skipped = ChainLink { chain_length: 7, ..last.chain.clone() };
    assert!(linker.check(&last.window_id, &skipped).await.is_err());

    let malformed = ChainLink { previous_merkle_root: None, ..last.chain.clone() };
    assert!(linker.check(&last.window_id, &malformed).await.is_err());
}

#[tokio::test]
async fn check_detects_rewritten_predecessor() {
    let store = Arc::new(MemoryWindowStore::new());
    let linker = ChainLinker::new(store.clone());
    let windows = build_chain(&linker, &store, "s", 2).await;

    let tampered = sealed(windows[0].window_id.clone(), windows[0].chain.clone(), 200);
    store.overwrite(tampered);

    assert!(linker.check(&windows[1].window_id, &windows[1].chain).await.is_err());
}
