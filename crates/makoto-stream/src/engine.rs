//! Stream engine wiring accumulation, sealing and event publication.
//!
//! ```text
//!  ingest ──▶ WindowAccumulator ──(closed windows)──▶ SealerPool ──▶ WindowSealer
//!                  │                                                  │  build tree
//!                  │ dropped records                                  │  wait for predecessor
//!                  ▼                                                  │  link + persist
//!           drop forwarder ────────────▶ EventHandler ◀───────────────┘
//! ```
//!
//! Ingest is synchronous and never waits on sealing or event delivery.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use makoto_core::{
    Clock, EventHandler, RecordDroppedEvent, StreamId, WindowEvent, WindowId, WindowSink,
    WindowStore,
};
use makoto_integrity::ChainLinker;
use tokio::{
    sync::{mpsc, RwLock},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    accumulator::{
        ClosedWindow, Record, StreamConfig, StreamMetrics, WindowAccumulator, WindowAssignment,
        WindowSnapshot,
    },
    error::{Result, StreamError},
    sealer::{SealerSettings, WindowSealer},
    worker_pool::SealerPool,
};

/// Immutable engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    worker_count: usize,
    parallel_threshold: usize,
    sample_proofs: usize,
    shutdown_timeout: Duration,
}

impl EngineConfig {
    /// Creates an engine configuration.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::Configuration` for zero workers, a zero
    /// parallel threshold or a zero shutdown timeout.
    pub fn new(
        worker_count: usize,
        parallel_threshold: usize,
        sample_proofs: usize,
        shutdown_timeout: Duration,
    ) -> Result<Self> {
        if worker_count == 0 {
            return Err(StreamError::configuration("seal worker count must be at least 1"));
        }
        if parallel_threshold == 0 {
            return Err(StreamError::configuration("parallel threshold must be at least 1"));
        }
        if shutdown_timeout.is_zero() {
            return Err(StreamError::configuration("shutdown timeout must be positive"));
        }
        Ok(Self { worker_count, parallel_threshold, sample_proofs, shutdown_timeout })
    }

    /// Returns the number of sealer workers.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Returns the leaf count at which tree levels are hashed in parallel.
    pub fn parallel_threshold(&self) -> usize {
        self.parallel_threshold
    }

    /// Returns the number of sample proofs per sealed window.
    pub fn sample_proofs(&self) -> usize {
        self.sample_proofs
    }

    /// Returns how long shutdown waits for queued windows.
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_SEAL_WORKERS,
            parallel_threshold: makoto_integrity::DEFAULT_PARALLEL_THRESHOLD,
            sample_proofs: crate::DEFAULT_SAMPLE_PROOFS,
            shutdown_timeout: Duration::from_secs(crate::DEFAULT_SHUTDOWN_TIMEOUT_SECONDS),
        }
    }
}

/// Sealing statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Running sealer workers.
    pub active_workers: usize,
    /// Windows linked and persisted.
    pub windows_sealed: u64,
    /// Windows that failed to seal.
    pub seal_failures: u64,
    /// Seals abandoned by cancellation.
    pub seals_cancelled: u64,
    /// Windows currently being sealed.
    pub in_flight_seals: u64,
    /// Late records dropped across all streams.
    pub records_dropped: u64,
}

/// Stream integrity engine.
#[derive(Debug)]
pub struct StreamEngine {
    config: EngineConfig,
    accumulator: WindowAccumulator,
    sealer: Arc<WindowSealer>,
    seal_queue: Option<mpsc::UnboundedReceiver<ClosedWindow>>,
    worker_pool: Option<SealerPool>,
    drops: mpsc::UnboundedSender<RecordDroppedEvent>,
    drop_queue: Option<mpsc::UnboundedReceiver<RecordDroppedEvent>>,
    drop_forwarder: Option<JoinHandle<()>>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    event_handler: Arc<dyn EventHandler>,
}

impl StreamEngine {
    /// Creates an engine persisting sealed windows to `store`.
    ///
    /// Sealed windows are linked against the same store, so it must return
    /// every window it accepted.
    pub fn new<S>(
        store: Arc<S>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        event_handler: Arc<dyn EventHandler>,
    ) -> Self
    where
        S: WindowSink + 'static,
    {
        let reader: Arc<dyn WindowStore> = store.clone();
        let sink: Arc<dyn WindowSink> = store;
        let stats = Arc::new(RwLock::new(EngineStats::default()));

        let sealer = Arc::new(WindowSealer::new(
            ChainLinker::new(reader),
            sink,
            event_handler.clone(),
            clock.clone(),
            stats.clone(),
            SealerSettings {
                parallel_threshold: config.parallel_threshold,
                sample_proofs: config.sample_proofs,
            },
        ));
        let (accumulator, seal_queue) = WindowAccumulator::new(clock);
        let (drops, drop_queue) = mpsc::unbounded_channel();

        Self {
            config,
            accumulator,
            sealer,
            seal_queue: Some(seal_queue),
            worker_pool: None,
            drops,
            drop_queue: Some(drop_queue),
            drop_forwarder: None,
            stats,
            cancellation_token: CancellationToken::new(),
            event_handler,
        }
    }

    /// Starts the sealer workers and the drop event forwarder.
    ///
    /// Windows closed before `start` are queued and sealed once workers run.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::AlreadyStarted` if called twice.
    pub async fn start(&mut self) -> Result<()> {
        let (Some(seal_queue), Some(mut drop_queue)) =
            (self.seal_queue.take(), self.drop_queue.take())
        else {
            return Err(StreamError::AlreadyStarted);
        };

        info!(worker_count = self.config.worker_count, "starting stream engine");

        let handler = self.event_handler.clone();
        let stats = self.stats.clone();
        self.drop_forwarder = Some(tokio::spawn(async move {
            while let Some(dropped) = drop_queue.recv().await {
                stats.write().await.records_dropped += 1;
                handler.handle_event(WindowEvent::RecordDropped(dropped)).await;
            }
        }));

        let mut pool = SealerPool::new(
            self.sealer.clone(),
            seal_queue,
            self.config.worker_count,
            self.stats.clone(),
            self.cancellation_token.clone(),
        );
        pool.spawn_workers().await;
        self.worker_pool = Some(pool);

        info!("stream engine started");
        Ok(())
    }

    /// Registers a stream.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::StreamAlreadyRegistered` if the id is taken.
    pub fn register_stream(&self, config: StreamConfig) -> Result<()> {
        info!(stream_id = %config.stream_id(), "registering stream");
        self.accumulator.register_stream(config)
    }

    /// Ingests one record.
    ///
    /// Dropped records are published as `WindowEvent::RecordDropped`
    /// asynchronously.
    ///
    /// # Errors
    ///
    /// See [`WindowAccumulator::ingest`].
    pub fn ingest(&self, stream_id: &StreamId, record: &Record) -> Result<WindowAssignment> {
        let assignment = self.accumulator.ingest(stream_id, record)?;
        if let WindowAssignment::LateRecordDropped(dropped) = &assignment {
            if self.drops.send(dropped.clone()).is_err() {
                debug!(stream_id = %stream_id, "drop forwarder stopped, event not published");
            }
        }
        Ok(assignment)
    }

    /// Advances a stream's watermark, queueing the windows it closes.
    ///
    /// # Errors
    ///
    /// See [`WindowAccumulator::advance_watermark`].
    pub fn advance_watermark(
        &self,
        stream_id: &StreamId,
        watermark: DateTime<Utc>,
    ) -> Result<Vec<WindowId>> {
        self.accumulator.advance_watermark(stream_id, watermark)
    }

    /// Closes and queues every open window of a stream.
    ///
    /// # Errors
    ///
    /// See [`WindowAccumulator::flush`].
    pub fn flush(&self, stream_id: &StreamId) -> Result<Vec<WindowId>> {
        self.accumulator.flush(stream_id)
    }

    /// Returns a stream's counters.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::UnknownStream` for an unregistered stream.
    pub fn metrics(&self, stream_id: &StreamId) -> Result<StreamMetrics> {
        self.accumulator.metrics(stream_id)
    }

    /// Returns snapshots of a stream's unsealed windows.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::UnknownStream` for an unregistered stream.
    pub fn open_windows(&self, stream_id: &StreamId) -> Result<Vec<WindowSnapshot>> {
        self.accumulator.open_windows(stream_id)
    }

    /// Returns the highest close ordinal of `stream_id` that finished
    /// sealing, successfully or not.
    pub fn sealed_through(&self, stream_id: &StreamId) -> u64 {
        self.sealer.barrier().completed(stream_id)
    }

    /// Returns current sealing statistics.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Stops accepting records and seals every window already closed.
    ///
    /// Windows still open are not sealed; call [`StreamEngine::flush`]
    /// first to seal them. If the workers do not drain the queue within the
    /// configured timeout, in-flight seals are cancelled.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::ShutdownTimeout` or `StreamError::WorkerPanic`
    /// from the pool.
    pub async fn shutdown(self) -> Result<()> {
        info!("shutting down stream engine");

        let Self { config, accumulator, worker_pool, drops, drop_forwarder, .. } = self;

        let unsealed: usize = accumulator
            .streams()
            .iter()
            .filter_map(|id| accumulator.metrics(id).ok())
            .map(|m| m.open_windows)
            .sum();
        if unsealed > 0 {
            warn!(open_windows = unsealed, "open windows discarded at shutdown");
        }

        drop(accumulator);
        drop(drops);

        let result = match worker_pool {
            Some(pool) => pool.shutdown_graceful(config.shutdown_timeout).await,
            None => {
                info!("stream engine was not started, shutdown completed immediately");
                Ok(())
            },
        };

        if let Some(forwarder) = drop_forwarder {
            if let Err(e) = forwarder.await {
                warn!(error = %e, "drop forwarder ended abnormally");
            }
        }
        result
    }
}
