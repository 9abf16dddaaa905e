//! Window lifecycle events.
//!
//! The sealing pipeline publishes what happened to each window; attestation
//! producers, metrics exporters and tests subscribe through [`EventHandler`]
//! without the engine knowing about them.
//!
//! ```text
//! ┌──────────────┐  Sealed / SealFailed /  ┌───────────────────────┐
//! │ SealerPool   │ ───── RecordDropped ───▶│ MulticastEventHandler │
//! └──────────────┘                         └───────────┬───────────┘
//!                                                      ▼
//!                                        ┌───────────────────────────┐
//!                                        │ AttestationEventSubscriber│
//!                                        │ stream-window statements  │
//!                                        └───────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    attestation::{MerkleProofDocument, WindowDescriptor},
    models::{SealedWindow, StreamId, WindowId},
};

/// Events emitted by the stream engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WindowEvent {
    /// A window was sealed, linked and persisted.
    Sealed(WindowSealedEvent),

    /// A record arrived beyond allowed lateness and was dropped.
    RecordDropped(RecordDroppedEvent),

    /// A closed window could not be sealed.
    SealFailed(WindowSealFailedEvent),
}

impl WindowEvent {
    /// Returns the stream the event belongs to.
    pub fn stream_id(&self) -> &StreamId {
        match self {
            Self::Sealed(e) => e.window.window_id.stream_id(),
            Self::RecordDropped(e) => &e.stream_id,
            Self::SealFailed(e) => e.window_id.stream_id(),
        }
    }
}

/// Event emitted when a window has been sealed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSealedEvent {
    /// Unique id of this seal.
    pub seal_id: Uuid,

    /// The persisted window.
    pub window: SealedWindow,

    /// Window definition, ready to embed in an attestation.
    pub descriptor: WindowDescriptor,

    /// Inclusion proofs for a sample of the window's leaves.
    pub sample_proofs: Vec<MerkleProofDocument>,

    /// Time between the window closing and being persisted.
    pub processing_latency_ms: u64,
}

/// Event emitted when a record is dropped for lateness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordDroppedEvent {
    /// Stream the record was sent to.
    pub stream_id: StreamId,

    /// Event time of the dropped record.
    pub event_time: DateTime<Utc>,

    /// Stream watermark at the time of the drop.
    pub watermark: DateTime<Utc>,

    /// Total records dropped on the stream so far.
    pub dropped_total: u64,
}

/// Event emitted when sealing a window fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSealFailedEvent {
    /// Window that failed.
    pub window_id: WindowId,

    /// Failure description.
    pub error_message: String,

    /// When the failure was observed.
    pub failed_at: DateTime<Utc>,
}

/// Receives window events.
///
/// Implementations must not block the sealing pipeline. Failures are
/// logged by the handler and never propagated back.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync + std::fmt::Debug {
    /// Handles one event.
    async fn handle_event(&self, event: WindowEvent);
}

/// Handler that discards every event.
#[derive(Debug, Default)]
pub struct NoOpEventHandler;

impl NoOpEventHandler {
    /// Creates a no-op handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl EventHandler for NoOpEventHandler {
    async fn handle_event(&self, _event: WindowEvent) {}
}

/// Forwards each event to every subscriber concurrently.
#[derive(Debug, Clone, Default)]
pub struct MulticastEventHandler {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl MulticastEventHandler {
    /// Creates a handler with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber.
    pub fn add_subscriber(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Returns the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait::async_trait]
impl EventHandler for MulticastEventHandler {
    async fn handle_event(&self, event: WindowEvent) {
        let deliveries = self.handlers.iter().map(|handler| {
            let event = event.clone();
            async move { handler.handle_event(event).await }
        });
        futures::future::join_all(deliveries).await;
    }
}
