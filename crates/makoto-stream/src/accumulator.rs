//! Per-stream window accumulation driven by watermarks.
//!
//! Each `(stream, window)` moves through `Open → Closing → Closed`:
//!
//! ```text
//!   watermark ≤ end          end < watermark ≤ end + lateness     watermark > end + lateness
//! ┌──────────┐  watermark  ┌───────────┐      watermark       ┌──────────┐
//! │   Open   │ ──────────▶ │  Closing  │ ───────────────────▶ │  Closed  │ ─▶ seal queue
//! └──────────┘             └───────────┘                      └──────────┘
//! ```
//!
//! Records older than `watermark - allowed_lateness` are dropped and counted;
//! accepted records older than the watermark are counted as late. Leaves
//! inside a window are ordered by the stream's arrival sequence number, not
//! by event time, so a window's Merkle root depends only on arrival order.
//!
//! Ingest holds the stream's gate for reading, so many records for one
//! stream are appended in parallel; appends to the same window serialize on
//! that window's map shard. Advancing the watermark holds the gate for
//! writing, which freezes every window before it is handed to the seal
//! queue. Streams share no locks.

use std::{
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use dashmap::DashMap;
use makoto_core::{
    attestation::WindowDescriptor, Clock, Digest, HashAlgorithm, RecordDroppedEvent, StreamId,
    WindowId, WindowKind,
};
use makoto_integrity::hasher;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    error::{Result, StreamError},
    window::WindowSpec,
};

/// One record offered to a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Raw record bytes; the leaf is the hash of these bytes.
    pub payload: Bytes,
    /// Event time used for window assignment.
    pub event_time: DateTime<Utc>,
}

impl Record {
    /// Creates a record.
    pub fn new(payload: impl Into<Bytes>, event_time: DateTime<Utc>) -> Self {
        Self { payload: payload.into(), event_time }
    }
}

/// Immutable per-stream configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    stream_id: StreamId,
    window: WindowSpec,
    allowed_lateness: Duration,
    max_out_of_orderness: Option<Duration>,
    algorithm: HashAlgorithm,
}

impl StreamConfig {
    /// Creates a stream configuration.
    ///
    /// With `max_out_of_orderness` set, the watermark follows the largest
    /// event time seen minus that bound; otherwise it only moves through
    /// explicit `advance_watermark` calls.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::Configuration` for an empty stream id or a
    /// negative lateness or out-of-orderness bound.
    pub fn new(
        stream_id: impl Into<StreamId>,
        window: WindowSpec,
        allowed_lateness: Duration,
        max_out_of_orderness: Option<Duration>,
        algorithm: HashAlgorithm,
    ) -> Result<Self> {
        let stream_id = stream_id.into();
        if stream_id.as_str().is_empty() {
            return Err(StreamError::configuration("stream id must not be empty"));
        }
        if allowed_lateness < Duration::zero() {
            return Err(StreamError::configuration("allowed lateness must not be negative"));
        }
        if max_out_of_orderness.is_some_and(|d| d < Duration::zero()) {
            return Err(StreamError::configuration("max out-of-orderness must not be negative"));
        }
        Ok(Self { stream_id, window, allowed_lateness, max_out_of_orderness, algorithm })
    }

    /// Returns the stream id.
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Returns the window definition.
    pub fn window(&self) -> &WindowSpec {
        &self.window
    }

    /// Returns how long a window stays open for late records after its end.
    pub fn allowed_lateness(&self) -> Duration {
        self.allowed_lateness
    }

    /// Returns the automatic watermark bound, if any.
    pub fn max_out_of_orderness(&self) -> Option<Duration> {
        self.max_out_of_orderness
    }

    /// Returns the leaf and node hash algorithm.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }
}

/// Lifecycle state of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowState {
    /// The watermark has not passed the window end.
    Open,
    /// Past the end but within allowed lateness.
    Closing,
    /// Frozen and handed to the sealer.
    Closed,
}

impl WindowState {
    /// Derives the state of a window ending at `end` from the watermark.
    pub fn at(
        end: DateTime<Utc>,
        allowed_lateness: Duration,
        watermark: Option<DateTime<Utc>>,
    ) -> Self {
        match watermark {
            Some(wm) if wm > later(end, allowed_lateness) => Self::Closed,
            Some(wm) if wm > end => Self::Closing,
            _ => Self::Open,
        }
    }
}

/// `time + span`, saturating at the latest representable instant. A window
/// whose close horizon saturates only closes on flush.
fn later(time: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    time.checked_add_signed(span).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `time - span`, saturating at the earliest representable instant.
fn earlier(time: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    time.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Outcome of ingesting one record.
#[derive(Debug, Clone)]
pub enum WindowAssignment {
    /// The record was appended to one or more windows.
    Assigned {
        /// Arrival sequence number within the stream.
        sequence: u64,
        /// Windows the record entered. Session ids reflect the session's
        /// bounds at the time of the append and grow as the session does.
        windows: Vec<WindowId>,
        /// Whether the record was older than the watermark.
        late: bool,
    },
    /// The record was older than `watermark - allowed_lateness`.
    LateRecordDropped(RecordDroppedEvent),
}

impl WindowAssignment {
    /// Returns the windows the record entered.
    pub fn windows(&self) -> &[WindowId] {
        match self {
            Self::Assigned { windows, .. } => windows,
            Self::LateRecordDropped(_) => &[],
        }
    }

    /// Returns true if the record was dropped.
    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::LateRecordDropped(_))
    }
}

/// A window frozen for sealing.
#[derive(Debug, Clone)]
pub struct ClosedWindow {
    /// Window identity.
    pub window_id: WindowId,
    /// Window kind.
    pub kind: WindowKind,
    /// Leaf and node hash algorithm.
    pub algorithm: HashAlgorithm,
    /// 1-based position of this window in the stream's close order.
    pub ordinal: u64,
    /// Window closed immediately before this one on the same stream.
    pub previous_window_id: Option<WindowId>,
    /// Leaves in arrival order.
    pub leaves: Vec<Digest>,
    /// Accepted records that arrived behind the watermark.
    pub late_records: u64,
    /// Records dropped on the stream since the previous window closed.
    pub dropped_records: u64,
    /// Earliest event time in the window.
    pub first_event_at: DateTime<Utc>,
    /// Latest event time in the window.
    pub last_event_at: DateTime<Utc>,
    /// Window definition for the attestation.
    pub descriptor: WindowDescriptor,
    /// When the window was frozen.
    pub closed_at: Instant,
}

/// Point-in-time view of an unsealed window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Window identity.
    pub window_id: WindowId,
    /// Current lifecycle state.
    pub state: WindowState,
    /// Leaves appended so far.
    pub leaf_count: u64,
    /// Late records appended so far.
    pub late_records: u64,
}

/// Counters for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamMetrics {
    /// Stream id.
    pub stream_id: StreamId,
    /// Current watermark.
    pub watermark: Option<DateTime<Utc>>,
    /// Largest event time accepted.
    pub max_event_time: Option<DateTime<Utc>>,
    /// Records appended to at least one window.
    pub accepted_records: u64,
    /// Accepted records that were behind the watermark.
    pub late_records: u64,
    /// Records dropped beyond allowed lateness.
    pub dropped_records: u64,
    /// Windows not yet closed.
    pub open_windows: usize,
    /// Windows handed to the seal queue.
    pub closed_windows: u64,
}

#[derive(Debug)]
struct WindowBuffer {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    leaves: Vec<(u64, Digest)>,
    late_records: u64,
    first_event_at: DateTime<Utc>,
    last_event_at: DateTime<Utc>,
}

impl WindowBuffer {
    fn new(start: DateTime<Utc>, end: DateTime<Utc>, event_time: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            leaves: Vec::new(),
            late_records: 0,
            first_event_at: event_time,
            last_event_at: event_time,
        }
    }

    fn push(&mut self, sequence: u64, leaf: Digest, event_time: DateTime<Utc>, late: bool) {
        self.leaves.push((sequence, leaf));
        self.first_event_at = self.first_event_at.min(event_time);
        self.last_event_at = self.last_event_at.max(event_time);
        if late {
            self.late_records += 1;
        }
    }

    fn absorb(&mut self, other: Self) {
        self.leaves.extend(other.leaves);
        self.late_records += other.late_records;
        self.first_event_at = self.first_event_at.min(other.first_event_at);
        self.last_event_at = self.last_event_at.max(other.last_event_at);
        self.start = self.start.min(other.start);
        self.end = self.end.max(other.end);
    }

    fn window_id(&self, stream_id: &StreamId) -> Result<WindowId> {
        Ok(WindowId::new(stream_id.clone(), self.start, self.end)?)
    }
}

#[derive(Debug, Default)]
struct Progress {
    watermark: Option<DateTime<Utc>>,
    closed: u64,
    last_closed: Option<WindowId>,
}

#[derive(Debug)]
struct StreamShard {
    config: StreamConfig,
    gate: RwLock<Progress>,
    windows: DashMap<(i64, i64), WindowBuffer>,
    sessions: Mutex<Vec<WindowBuffer>>,
    sequence: AtomicU64,
    max_event_ms: AtomicI64,
    accepted: AtomicU64,
    late: AtomicU64,
    dropped: AtomicU64,
    dropped_since_close: AtomicU64,
}

impl StreamShard {
    fn new(config: StreamConfig) -> Self {
        Self {
            config,
            gate: RwLock::new(Progress::default()),
            windows: DashMap::new(),
            sessions: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
            max_event_ms: AtomicI64::new(i64::MIN),
            accepted: AtomicU64::new(0),
            late: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            dropped_since_close: AtomicU64::new(0),
        }
    }

    fn stream_id(&self) -> &StreamId {
        &self.config.stream_id
    }

    fn max_event_time(&self) -> Option<DateTime<Utc>> {
        match self.max_event_ms.load(Ordering::Acquire) {
            i64::MIN => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }

    fn append_fixed(
        &self,
        sequence: u64,
        leaf: Digest,
        event_time: DateTime<Utc>,
        late: bool,
    ) -> Result<Vec<WindowId>> {
        let bounds = self.config.window.assign(event_time);
        let mut ids = Vec::with_capacity(bounds.len());
        for (start, end) in bounds {
            let key = (start.timestamp_millis(), end.timestamp_millis());
            self.windows
                .entry(key)
                .or_insert_with(|| WindowBuffer::new(start, end, event_time))
                .push(sequence, leaf, event_time, late);
            ids.push(WindowId::new(self.stream_id().clone(), start, end)?);
        }
        Ok(ids)
    }

    fn append_session(
        &self,
        sequence: u64,
        leaf: Digest,
        event_time: DateTime<Utc>,
        late: bool,
    ) -> Result<Vec<WindowId>> {
        let gap = self.config.window.gap().unwrap_or_else(|| self.config.window.size());
        let mut sessions = self.sessions.lock();

        let (touching, mut rest): (Vec<_>, Vec<_>) =
            std::mem::take(&mut *sessions).into_iter().partition(|s: &WindowBuffer| {
                event_time >= earlier(s.first_event_at, gap)
                    && event_time <= later(s.last_event_at, gap)
            });

        let mut session = WindowBuffer::new(event_time, later(event_time, gap), event_time);
        for other in touching {
            session.absorb(other);
        }
        session.push(sequence, leaf, event_time, late);
        session.start = session.first_event_at;
        session.end = later(session.last_event_at, gap);

        let id = session.window_id(self.stream_id())?;
        rest.push(session);
        *sessions = rest;
        Ok(vec![id])
    }

    /// Removes every window that `watermark` closes, or every window when
    /// `watermark` is `None`, and assigns close ordinals.
    fn close(
        &self,
        progress: &mut Progress,
        watermark: Option<DateTime<Utc>>,
        closed_at: Instant,
    ) -> Result<Vec<ClosedWindow>> {
        let lateness = self.config.allowed_lateness;
        let ready = |end: DateTime<Utc>| watermark.map_or(true, |wm| wm > later(end, lateness));

        let keys: Vec<(i64, i64)> = self
            .windows
            .iter()
            .filter(|entry| ready(entry.value().end))
            .map(|entry| *entry.key())
            .collect();
        let mut buffers: Vec<WindowBuffer> =
            keys.iter().filter_map(|key| self.windows.remove(key).map(|(_, b)| b)).collect();

        {
            let mut sessions = self.sessions.lock();
            let (done, open): (Vec<_>, Vec<_>) =
                std::mem::take(&mut *sessions).into_iter().partition(|s| ready(s.end));
            *sessions = open;
            buffers.extend(done);
        }

        buffers.sort_by_key(|b| (b.end, b.start));

        let descriptor = self.config.window.descriptor(lateness, progress.watermark);
        let mut dropped = self.dropped_since_close.swap(0, Ordering::AcqRel);
        let mut closed = Vec::with_capacity(buffers.len());
        for mut buffer in buffers {
            buffer.leaves.sort_unstable_by_key(|(sequence, _)| *sequence);
            let window_id = buffer.window_id(self.stream_id())?;
            progress.closed += 1;

            closed.push(ClosedWindow {
                window_id: window_id.clone(),
                kind: self.config.window.kind(),
                algorithm: self.config.algorithm,
                ordinal: progress.closed,
                previous_window_id: progress.last_closed.replace(window_id),
                leaves: buffer.leaves.into_iter().map(|(_, leaf)| leaf).collect(),
                late_records: buffer.late_records,
                dropped_records: std::mem::take(&mut dropped),
                first_event_at: buffer.first_event_at,
                last_event_at: buffer.last_event_at,
                descriptor: descriptor.clone(),
                closed_at,
            });
        }

        if dropped > 0 {
            self.dropped_since_close.fetch_add(dropped, Ordering::AcqRel);
        }
        Ok(closed)
    }

    fn open_window_count(&self) -> usize {
        self.windows.len() + self.sessions.lock().len()
    }
}

/// Assigns records to windows and hands closed windows to the seal queue.
#[derive(Debug)]
pub struct WindowAccumulator {
    streams: DashMap<StreamId, Arc<StreamShard>>,
    seal_queue: mpsc::UnboundedSender<ClosedWindow>,
    clock: Arc<dyn Clock>,
}

impl WindowAccumulator {
    /// Creates an accumulator and the receiving end of its seal queue.
    pub fn new(clock: Arc<dyn Clock>) -> (Self, mpsc::UnboundedReceiver<ClosedWindow>) {
        let (seal_queue, receiver) = mpsc::unbounded_channel();
        (Self { streams: DashMap::new(), seal_queue, clock }, receiver)
    }

    /// Registers a stream.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::StreamAlreadyRegistered` if the id is taken.
    pub fn register_stream(&self, config: StreamConfig) -> Result<()> {
        let stream_id = config.stream_id.clone();
        match self.streams.entry(stream_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(StreamError::StreamAlreadyRegistered { stream_id })
            },
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(
                    stream_id = %stream_id,
                    window_kind = %config.window.kind(),
                    "stream registered"
                );
                slot.insert(Arc::new(StreamShard::new(config)));
                Ok(())
            },
        }
    }

    /// Returns the registered stream ids.
    pub fn streams(&self) -> Vec<StreamId> {
        self.streams.iter().map(|entry| entry.key().clone()).collect()
    }

    fn shard(&self, stream_id: &StreamId) -> Result<Arc<StreamShard>> {
        self.streams
            .get(stream_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StreamError::unknown_stream(stream_id))
    }

    /// Appends a record to every window it belongs to.
    ///
    /// Never blocks on sealing. With automatic watermarks configured, the
    /// watermark may advance afterwards and close windows.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::UnknownStream` for an unregistered stream and
    /// `StreamError::SealQueueClosed` if windows closed by an automatic
    /// watermark cannot be queued.
    pub fn ingest(&self, stream_id: &StreamId, record: &Record) -> Result<WindowAssignment> {
        let shard = self.shard(stream_id)?;
        let event_time = record.event_time;
        let leaf = hasher::leaf_hash(shard.config.algorithm, &record.payload);

        let assignment = {
            let progress = shard.gate.read();

            if let Some(wm) = progress.watermark {
                let cutoff = wm.checked_sub_signed(shard.config.allowed_lateness);
                if cutoff.is_some_and(|cutoff| event_time < cutoff) {
                    shard.dropped_since_close.fetch_add(1, Ordering::AcqRel);
                    let dropped_total = shard.dropped.fetch_add(1, Ordering::AcqRel) + 1;
                    debug!(
                        stream_id = %stream_id,
                        event_time = %event_time,
                        watermark = %wm,
                        "late record dropped"
                    );
                    return Ok(WindowAssignment::LateRecordDropped(RecordDroppedEvent {
                        stream_id: stream_id.clone(),
                        event_time,
                        watermark: wm,
                        dropped_total,
                    }));
                }
            }

            let late = progress.watermark.is_some_and(|wm| event_time < wm);
            let sequence = shard.sequence.fetch_add(1, Ordering::AcqRel);
            let windows = match shard.config.window.kind() {
                WindowKind::Session => shard.append_session(sequence, leaf, event_time, late)?,
                WindowKind::Tumbling | WindowKind::Sliding => {
                    shard.append_fixed(sequence, leaf, event_time, late)?
                },
            };

            shard.accepted.fetch_add(1, Ordering::AcqRel);
            if late {
                shard.late.fetch_add(1, Ordering::AcqRel);
            }
            shard.max_event_ms.fetch_max(event_time.timestamp_millis(), Ordering::AcqRel);

            WindowAssignment::Assigned { sequence, windows, late }
        };

        if let Some(bound) = shard.config.max_out_of_orderness {
            let candidate = shard.max_event_time().and_then(|t| t.checked_sub_signed(bound));
            if let Some(candidate) = candidate {
                let current = shard.gate.read().watermark;
                if current.map_or(true, |wm| candidate > wm) {
                    self.advance(&shard, candidate)?;
                }
            }
        }

        Ok(assignment)
    }

    /// Moves the stream's watermark forward and closes every window it
    /// passes by more than the allowed lateness.
    ///
    /// Watermarks never move backwards; an older value is ignored. Returns
    /// the ids of the windows closed, in close order.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::UnknownStream` for an unregistered stream and
    /// `StreamError::SealQueueClosed` if the seal queue is gone.
    pub fn advance_watermark(
        &self,
        stream_id: &StreamId,
        watermark: DateTime<Utc>,
    ) -> Result<Vec<WindowId>> {
        let shard = self.shard(stream_id)?;
        self.advance(&shard, watermark)
    }

    fn advance(&self, shard: &StreamShard, watermark: DateTime<Utc>) -> Result<Vec<WindowId>> {
        let mut progress = shard.gate.write();
        if progress.watermark.is_some_and(|current| watermark <= current) {
            return Ok(Vec::new());
        }
        progress.watermark = Some(watermark);

        let closed = shard.close(&mut progress, Some(watermark), self.clock.now())?;
        self.enqueue(shard.stream_id(), closed)
    }

    /// Closes every window of the stream regardless of the watermark.
    ///
    /// Used at end of stream. The watermark moves past every flushed window
    /// so records for those windows are dropped from now on rather than
    /// reopening them.
    ///
    /// # Errors
    ///
    /// Same as [`WindowAccumulator::advance_watermark`].
    pub fn flush(&self, stream_id: &StreamId) -> Result<Vec<WindowId>> {
        let shard = self.shard(stream_id)?;
        let mut progress = shard.gate.write();

        let closed = shard.close(&mut progress, None, self.clock.now())?;
        let lateness = shard.config.allowed_lateness;
        if let Some(horizon) = closed.iter().map(|w| later(w.window_id.end(), lateness)).max() {
            if progress.watermark.map_or(true, |wm| horizon > wm) {
                progress.watermark = Some(horizon);
            }
        }
        self.enqueue(shard.stream_id(), closed)
    }

    fn enqueue(&self, stream_id: &StreamId, closed: Vec<ClosedWindow>) -> Result<Vec<WindowId>> {
        let mut ids = Vec::with_capacity(closed.len());
        for window in closed {
            debug!(
                stream_id = %stream_id,
                window_id = %window.window_id,
                ordinal = window.ordinal,
                leaf_count = window.leaves.len(),
                "window closed"
            );
            ids.push(window.window_id.clone());
            if self.seal_queue.send(window).is_err() {
                warn!(stream_id = %stream_id, "seal queue closed, window discarded");
                return Err(StreamError::SealQueueClosed);
            }
        }
        Ok(ids)
    }

    /// Returns the stream's counters.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::UnknownStream` for an unregistered stream.
    pub fn metrics(&self, stream_id: &StreamId) -> Result<StreamMetrics> {
        let shard = self.shard(stream_id)?;
        let progress = shard.gate.read();
        Ok(StreamMetrics {
            stream_id: stream_id.clone(),
            watermark: progress.watermark,
            max_event_time: shard.max_event_time(),
            accepted_records: shard.accepted.load(Ordering::Acquire),
            late_records: shard.late.load(Ordering::Acquire),
            dropped_records: shard.dropped.load(Ordering::Acquire),
            open_windows: shard.open_window_count(),
            closed_windows: progress.closed,
        })
    }

    /// Returns snapshots of the stream's unsealed windows ordered by end.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::UnknownStream` for an unregistered stream.
    pub fn open_windows(&self, stream_id: &StreamId) -> Result<Vec<WindowSnapshot>> {
        let shard = self.shard(stream_id)?;
        let progress = shard.gate.read();
        let lateness = shard.config.allowed_lateness;

        let snapshot = |buffer: &WindowBuffer| -> Result<WindowSnapshot> {
            Ok(WindowSnapshot {
                window_id: buffer.window_id(stream_id)?,
                state: WindowState::at(buffer.end, lateness, progress.watermark),
                leaf_count: u64::try_from(buffer.leaves.len()).unwrap_or(u64::MAX),
                late_records: buffer.late_records,
            })
        };

        let mut snapshots = shard
            .windows
            .iter()
            .map(|entry| snapshot(entry.value()))
            .collect::<Result<Vec<_>>>()?;
        for session in shard.sessions.lock().iter() {
            snapshots.push(snapshot(session)?);
        }
        snapshots.sort_by(|a, b| {
            (a.window_id.end(), a.window_id.start()).cmp(&(b.window_id.end(), b.window_id.start()))
        });
        Ok(snapshots)
    }
}
