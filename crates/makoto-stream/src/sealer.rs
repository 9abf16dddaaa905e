//! Sealing of closed windows: tree build, chain link, persistence.
//!
//! Merkle builds run on the blocking pool and may proceed for many windows
//! at once. Linking may not: window `n` of a stream is linked only after
//! window `n - 1` has been linked and persisted (or has failed). The
//! [`ChainBarrier`] enforces this per stream; different streams never wait
//! on each other.

use std::sync::Arc;

use dashmap::DashMap;
use makoto_core::{
    Clock, EventHandler, MerkleProofDocument, SealedWindow, StreamId, WindowEvent,
    WindowSealFailedEvent, WindowSealedEvent, WindowSink,
};
use makoto_integrity::{ChainLinker, IntegrityError, MerkleTree};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{
    accumulator::ClosedWindow,
    engine::EngineStats,
    error::{Result, StreamError},
};

/// Per-stream ordering barrier for chain linking.
///
/// Tracks, for each stream, the highest close ordinal whose sealing has
/// finished. Ordinals complete in order because every window waits for its
/// predecessor before completing.
#[derive(Debug, Default)]
pub struct ChainBarrier {
    streams: DashMap<StreamId, watch::Sender<u64>>,
}

impl ChainBarrier {
    /// Creates an empty barrier.
    pub fn new() -> Self {
        Self::default()
    }

    fn receiver(&self, stream_id: &StreamId) -> watch::Receiver<u64> {
        self.streams
            .entry(stream_id.clone())
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }

    /// Waits until `ordinal - 1` has completed on `stream_id`.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::Cancelled` if `cancel` fires first.
    pub async fn wait_turn(
        &self,
        stream_id: &StreamId,
        ordinal: u64,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let predecessor = ordinal.saturating_sub(1);
        let mut receiver = self.receiver(stream_id);

        tokio::select! {
            result = receiver.wait_for(|done| *done >= predecessor) => {
                result.map(|_| ()).map_err(|_| StreamError::Cancelled)
            },
            () = cancel.cancelled() => Err(StreamError::Cancelled),
        }
    }

    /// Marks `ordinal` as completed on `stream_id`.
    pub fn complete(&self, stream_id: &StreamId, ordinal: u64) {
        self.streams
            .entry(stream_id.clone())
            .or_insert_with(|| watch::channel(0).0)
            .send_modify(|done| *done = (*done).max(ordinal));
    }

    /// Returns the highest completed ordinal on `stream_id`.
    pub fn completed(&self, stream_id: &StreamId) -> u64 {
        self.streams.get(stream_id).map_or(0, |sender| *sender.borrow())
    }
}

/// Tree building options for the sealer.
#[derive(Debug, Clone, Copy)]
pub struct SealerSettings {
    /// Leaf count at which tree levels are hashed in parallel.
    pub parallel_threshold: usize,
    /// Number of inclusion proofs embedded in each sealed-window event.
    pub sample_proofs: usize,
}

struct PreparedWindow {
    closed: ClosedWindow,
    tree: MerkleTree,
    sample_proofs: Vec<MerkleProofDocument>,
}

/// Seals closed windows and publishes the outcome.
#[derive(Debug)]
pub struct WindowSealer {
    linker: ChainLinker,
    sink: Arc<dyn WindowSink>,
    barrier: ChainBarrier,
    event_handler: Arc<dyn EventHandler>,
    clock: Arc<dyn Clock>,
    stats: Arc<RwLock<EngineStats>>,
    settings: SealerSettings,
}

impl WindowSealer {
    /// Creates a sealer.
    pub fn new(
        linker: ChainLinker,
        sink: Arc<dyn WindowSink>,
        event_handler: Arc<dyn EventHandler>,
        clock: Arc<dyn Clock>,
        stats: Arc<RwLock<EngineStats>>,
        settings: SealerSettings,
    ) -> Self {
        Self {
            linker,
            sink,
            barrier: ChainBarrier::new(),
            event_handler,
            clock,
            stats,
            settings,
        }
    }

    /// Returns the chain barrier.
    pub fn barrier(&self) -> &ChainBarrier {
        &self.barrier
    }

    /// Seals one closed window.
    ///
    /// Builds the tree, waits for the stream's previous window, links,
    /// persists, then publishes `Sealed` or `SealFailed`. The barrier is
    /// released whether or not sealing succeeds, so a failed window makes
    /// its successor fail with an unknown-previous-window error instead of
    /// stalling the stream.
    ///
    /// # Errors
    ///
    /// Returns the sealing failure after it has been published, or
    /// `StreamError::Cancelled` if cancelled while waiting for the
    /// predecessor.
    pub async fn seal(
        &self,
        closed: ClosedWindow,
        cancel: &CancellationToken,
    ) -> Result<SealedWindow> {
        let stream_id = closed.window_id.stream_id().clone();
        let window_id = closed.window_id.clone();
        let ordinal = closed.ordinal;

        {
            let mut stats = self.stats.write().await;
            stats.in_flight_seals += 1;
        }

        let prepared = self.prepare(closed).await;

        let outcome = match self.barrier.wait_turn(&stream_id, ordinal, cancel).await {
            Ok(()) => {
                let outcome = match prepared {
                    Ok(prepared) => self.link_and_persist(prepared).await,
                    Err(e) => Err(e),
                };
                self.barrier.complete(&stream_id, ordinal);
                outcome
            },
            Err(e) => Err(e),
        };

        {
            let mut stats = self.stats.write().await;
            stats.in_flight_seals -= 1;
            match &outcome {
                Ok(_) => stats.windows_sealed += 1,
                Err(StreamError::Cancelled) => stats.seals_cancelled += 1,
                Err(_) => stats.seal_failures += 1,
            }
        }

        match outcome {
            Ok((window, event)) => {
                self.event_handler.handle_event(WindowEvent::Sealed(event)).await;
                Ok(window)
            },
            Err(StreamError::Cancelled) => {
                warn!(window_id = %window_id, "sealing cancelled before linking");
                Err(StreamError::Cancelled)
            },
            Err(e) => {
                error!(window_id = %window_id, error = %e, "window seal failed");
                self.event_handler
                    .handle_event(WindowEvent::SealFailed(WindowSealFailedEvent {
                        window_id,
                        error_message: e.to_string(),
                        failed_at: self.clock.now_utc(),
                    }))
                    .await;
                Err(e)
            },
        }
    }

    async fn prepare(&self, mut closed: ClosedWindow) -> Result<PreparedWindow> {
        let settings = self.settings;
        let leaves = std::mem::take(&mut closed.leaves);
        let algorithm = closed.algorithm;

        let (tree, sample_proofs) = tokio::task::spawn_blocking(move || {
            let tree =
                MerkleTree::build_with_threshold(leaves, algorithm, settings.parallel_threshold)?;
            let proofs = sample_indices(tree.leaf_count(), settings.sample_proofs)
                .into_iter()
                .map(|index| {
                    let proof = tree.prove(index)?;
                    let leaf = usize::try_from(index)
                        .ok()
                        .and_then(|i| tree.leaves().get(i).copied())
                        .ok_or(IntegrityError::IndexOutOfRange {
                            index,
                            leaf_count: tree.leaf_count(),
                        })?;
                    Ok(proof.to_document(&leaf))
                })
                .collect::<std::result::Result<Vec<_>, IntegrityError>>()?;
            Ok::<_, IntegrityError>((tree, proofs))
        })
        .await
        .map_err(|e| StreamError::BuildAborted {
            window_id: closed.window_id.clone(),
            error: e.to_string(),
        })??;

        debug!(
            window_id = %closed.window_id,
            leaf_count = tree.leaf_count(),
            height = tree.height(),
            root = %tree.root(),
            "window tree built"
        );
        Ok(PreparedWindow { closed, tree, sample_proofs })
    }

    async fn link_and_persist(
        &self,
        prepared: PreparedWindow,
    ) -> Result<(SealedWindow, WindowSealedEvent)> {
        let PreparedWindow { closed, tree, sample_proofs } = prepared;

        let chain = self.linker.link(&closed.window_id, closed.previous_window_id.as_ref()).await?;
        let window = SealedWindow {
            window_id: closed.window_id,
            kind: closed.kind,
            tree: tree.head(),
            chain,
            late_records: closed.late_records,
            dropped_records: closed.dropped_records,
            first_event_at: closed.first_event_at,
            last_event_at: closed.last_event_at,
            sealed_at: self.clock.now_utc(),
        };

        self.sink.put(window.clone()).await.map_err(IntegrityError::from)?;

        let latency = self.clock.now().saturating_duration_since(closed.closed_at);
        let event = WindowSealedEvent {
            seal_id: Uuid::new_v4(),
            window: window.clone(),
            descriptor: closed.descriptor,
            sample_proofs,
            processing_latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
        };

        debug!(
            window_id = %window.window_id,
            chain_length = window.chain.chain_length,
            "window sealed"
        );
        Ok((window, event))
    }
}

/// Picks up to `count` distinct leaf indices spread evenly across the tree,
/// always including the first and last leaf when `count >= 2`.
pub fn sample_indices(leaf_count: u64, count: usize) -> Vec<u64> {
    let count = u64::try_from(count).unwrap_or(u64::MAX).min(leaf_count);
    match count {
        0 => Vec::new(),
        1 => vec![0],
        _ => {
            let mut indices: Vec<u64> =
                (0..count).map(|k| k * (leaf_count - 1) / (count - 1)).collect();
            indices.dedup();
            indices
        },
    }
}
