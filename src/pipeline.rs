//! Configured ingest-to-verification pipeline.
//!
//! Wires a stream engine to an attestation subscriber so every sealed
//! window is attested, and verifies the resulting attestations against the
//! same window store once ingestion ends.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use makoto_core::{Attestation, Clock, SealedWindow, StreamId, WindowId};
use makoto_integrity::{
    attestation_ref, AttestationEventSubscriber, Ed25519SignatureVerifier, EnvelopeSigner,
    MemoryAttestationStore, MemoryWindowStore,
};
use makoto_stream::{EngineStats, Record, StreamEngine, StreamMetrics, WindowAssignment};
use makoto_verify::{ChainVerifier, Collaborators, VerificationResult};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Config;

/// Running pipeline for the configured stream.
#[derive(Debug)]
pub struct Pipeline {
    engine: StreamEngine,
    stream_id: StreamId,
    windows: Arc<MemoryWindowStore>,
    attestations: Arc<MemoryAttestationStore>,
    signer: Option<Arc<EnvelopeSigner>>,
    verifier: ChainVerifier,
}

impl Pipeline {
    /// Starts the engine and registers the configured stream.
    ///
    /// With a `signer`, attestations are signed and claim L2; without one
    /// they claim L1.
    pub async fn start(
        config: &Config,
        signer: Option<Arc<EnvelopeSigner>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let stream = config.to_stream_config()?;
        let stream_id = stream.stream_id().clone();
        let windows = Arc::new(MemoryWindowStore::new());
        let attestations = Arc::new(MemoryAttestationStore::new());
        let subscriber =
            Arc::new(AttestationEventSubscriber::new(attestations.clone(), signer.clone()));

        let engine_config = config.to_engine_config()?;
        let mut engine =
            StreamEngine::new(windows.clone(), engine_config, clock.clone(), subscriber);
        engine.start().await.context("Failed to start stream engine")?;
        engine.register_stream(stream).context("Failed to register stream")?;

        info!(stream_id = %stream_id, signed = signer.is_some(), "pipeline started");
        Ok(Self {
            engine,
            stream_id,
            windows,
            attestations,
            signer,
            verifier: ChainVerifier::new(config.to_verifier_config()?, clock),
        })
    }

    /// Returns the ingested stream.
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Ingests one record.
    pub fn ingest(&self, record: &Record) -> Result<WindowAssignment> {
        Ok(self.engine.ingest(&self.stream_id, record)?)
    }

    /// Advances the watermark, returning the windows it closed.
    pub fn advance_watermark(&self, watermark: DateTime<Utc>) -> Result<Vec<WindowId>> {
        Ok(self.engine.advance_watermark(&self.stream_id, watermark)?)
    }

    /// Returns the stream's counters.
    pub fn metrics(&self) -> Result<StreamMetrics> {
        Ok(self.engine.metrics(&self.stream_id)?)
    }

    /// Seals every open window and stops the engine.
    pub async fn finish(self) -> Result<Attested> {
        let flushed = self.engine.flush(&self.stream_id)?;
        let stats = self.engine.stats().await;
        self.engine.shutdown().await.context("Stream engine did not shut down cleanly")?;

        let chain = self.windows.chain(&self.stream_id);
        info!(
            stream_id = %self.stream_id,
            flushed = flushed.len(),
            sealed = chain.len(),
            "pipeline finished"
        );

        let keys = self.signer.iter().map(|signer| signer.verifying_key());
        let mut collaborators = Collaborators::new(
            self.attestations.clone(),
            Arc::new(Ed25519SignatureVerifier::new(keys)),
        );
        collaborators.window_store = Some(self.windows.clone());

        Ok(Attested {
            chain,
            stats,
            windows: self.windows,
            attestations: self.attestations,
            collaborators,
            verifier: self.verifier,
        })
    }
}

/// Sealed and attested output of a finished pipeline.
#[derive(Debug)]
pub struct Attested {
    chain: Vec<SealedWindow>,
    stats: EngineStats,
    windows: Arc<MemoryWindowStore>,
    attestations: Arc<MemoryAttestationStore>,
    collaborators: Collaborators,
    verifier: ChainVerifier,
}

impl Attested {
    /// Sealed windows in chain order.
    pub fn chain(&self) -> &[SealedWindow] {
        &self.chain
    }

    /// Engine statistics taken before shutdown.
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Sealed window store.
    pub fn windows(&self) -> &Arc<MemoryWindowStore> {
        &self.windows
    }

    /// Attestation store, which also resolves lineage references.
    pub fn attestations(&self) -> &Arc<MemoryAttestationStore> {
        &self.attestations
    }

    /// Returns the attestation of a sealed window.
    pub fn attestation(&self, window_id: &WindowId) -> Option<Attestation> {
        self.attestations.get(&attestation_ref(window_id))
    }

    /// Verifies `attestation` and its lineage against the sealed windows.
    pub async fn verify(&self, attestation: &Attestation) -> VerificationResult {
        self.verifier.verify_with(attestation, &self.collaborators, &CancellationToken::new()).await
    }

    /// Verifies every window attestation in chain order.
    pub async fn verify_all(&self) -> Result<Vec<(WindowId, VerificationResult)>> {
        let mut results = Vec::with_capacity(self.chain.len());
        for window in &self.chain {
            let attestation = self
                .attestation(&window.window_id)
                .with_context(|| format!("No attestation for window {}", window.window_id))?;
            results.push((window.window_id.clone(), self.verify(&attestation).await));
        }
        Ok(results)
    }
}
