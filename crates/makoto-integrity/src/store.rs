//! In-process stores for sealed windows and attestations.

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use makoto_core::{
    Attestation, AttestationRef, AttestationResolver, CollaboratorError, CollaboratorResult,
    SealedWindow, StreamId, WindowId, WindowSink, WindowStore,
};

/// Append-only sealed window store.
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    windows: DashMap<WindowId, SealedWindow>,
}

impl MemoryWindowStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored windows.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Returns a stream's windows ordered by chain position.
    pub fn chain(&self, stream_id: &StreamId) -> Vec<SealedWindow> {
        let mut windows: Vec<SealedWindow> = self
            .windows
            .iter()
            .filter(|entry| entry.key().stream_id() == stream_id)
            .map(|entry| entry.value().clone())
            .collect();
        windows.sort_by_key(|w| w.chain.chain_length);
        windows
    }

    /// Replaces a stored window without the append-only check.
    ///
    /// Only for simulating tampered storage in tests.
    #[doc(hidden)]
    pub fn overwrite(&self, window: SealedWindow) {
        self.windows.insert(window.window_id.clone(), window);
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn get(&self, window_id: &WindowId) -> CollaboratorResult<Option<SealedWindow>> {
        Ok(self.windows.get(window_id).map(|entry| entry.value().clone()))
    }
}

#[async_trait]
impl WindowSink for MemoryWindowStore {
    async fn put(&self, window: SealedWindow) -> CollaboratorResult<()> {
        match self.windows.entry(window.window_id.clone()) {
            Entry::Occupied(_) => Err(CollaboratorError::rejected(format!(
                "window {} is already sealed",
                window.window_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(window);
                Ok(())
            },
        }
    }
}

/// Attestations addressable by reference.
#[derive(Debug, Default)]
pub struct MemoryAttestationStore {
    attestations: DashMap<AttestationRef, Attestation>,
}

impl MemoryAttestationStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `attestation` under `reference`, replacing any previous one.
    pub fn insert(&self, reference: AttestationRef, attestation: Attestation) {
        self.attestations.insert(reference, attestation);
    }

    /// Returns the attestation stored under `reference`.
    pub fn get(&self, reference: &AttestationRef) -> Option<Attestation> {
        self.attestations.get(reference).map(|entry| entry.value().clone())
    }

    /// Returns the number of stored attestations.
    pub fn len(&self) -> usize {
        self.attestations.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.attestations.is_empty()
    }
}

#[async_trait]
impl AttestationResolver for MemoryAttestationStore {
    async fn fetch(&self, reference: &AttestationRef) -> CollaboratorResult<Option<Attestation>> {
        Ok(self.get(reference))
    }
}
