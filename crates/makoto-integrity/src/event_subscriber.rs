//! Event subscriber turning sealed windows into stream-window attestations.
//!
//! Every `WindowEvent::Sealed` becomes an in-toto statement with a
//! stream-window predicate, optionally signed, and is stored under the
//! window id so lineage verification can resolve it.

use std::sync::Arc;

use makoto_core::{
    attestation::{
        IntegrityDescriptor, MerkleTreeDescriptor, Predicate, Statement, StreamDescriptor,
        StreamMetadata, StreamVerification, WindowAggregates, WindowStatistics,
    },
    duration, Attestation, AttestationBody, AttestationRef, DigestSet, EventHandler, Level,
    StreamWindowPredicate, Subject, WindowEvent, WindowId, WindowSealedEvent,
};
use tracing::{debug, error, warn};

use crate::{error::Result, signing::EnvelopeSigner, store::MemoryAttestationStore};

/// Returns the reference under which a window's attestation is stored.
pub fn attestation_ref(window_id: &WindowId) -> AttestationRef {
    AttestationRef::new(format!("stream-window:{window_id}"))
}

/// Builds the stream-window statement for a sealed window.
///
/// # Errors
///
/// Returns an error if the statement violates a structural rule.
pub fn stream_window_statement(event: &WindowSealedEvent) -> Result<Statement> {
    let window = &event.window;
    let tree = &window.tree;

    let subject = Subject::new(
        window.window_id.to_string(),
        DigestSet {
            merkle_root: Some(tree.root.to_hex()),
            record_count: Some(tree.leaf_count.to_string()),
            ..DigestSet::default()
        },
    );

    let predicate = StreamWindowPredicate {
        stream: StreamDescriptor {
            id: window.window_id.stream_id().clone(),
            source: None,
            topic: None,
            partitions: None,
        },
        window: event.descriptor.clone(),
        integrity: IntegrityDescriptor {
            merkle_tree: MerkleTreeDescriptor {
                algorithm: tree.algorithm,
                leaf_count: tree.leaf_count,
                tree_height: Some(tree.height),
                root: tree.root,
            },
            chain: Some(window.chain.clone()),
        },
        collector: None,
        aggregates: Some(WindowAggregates {
            statistics: Some(WindowStatistics {
                min_timestamp: Some(window.first_event_at),
                max_timestamp: Some(window.last_event_at),
            }),
        }),
        metadata: Some(StreamMetadata {
            late_records: window.late_records,
            dropped_records: window.dropped_records,
            processing_latency: Some(duration::format(chrono::Duration::milliseconds(
                i64::try_from(event.processing_latency_ms).unwrap_or(i64::MAX),
            ))),
        }),
        verification: Some(StreamVerification {
            merkle_proof_available: !event.sample_proofs.is_empty(),
            proof_endpoint: None,
            sample_proofs: event.sample_proofs.clone(),
        }),
    };

    Ok(Statement::new(vec![subject], Predicate::StreamWindow(Box::new(predicate)))?)
}

/// Stores an attestation for every sealed window.
///
/// Signed attestations claim L2; unsigned ones claim L1.
#[derive(Debug)]
pub struct AttestationEventSubscriber {
    store: Arc<MemoryAttestationStore>,
    signer: Option<Arc<EnvelopeSigner>>,
}

impl AttestationEventSubscriber {
    /// Creates a subscriber writing into `store`, signing with `signer` if
    /// one is given.
    pub fn new(store: Arc<MemoryAttestationStore>, signer: Option<Arc<EnvelopeSigner>>) -> Self {
        Self { store, signer }
    }

    fn attest(&self, event: &WindowSealedEvent) -> Result<Attestation> {
        let body = AttestationBody::Statement(stream_window_statement(event)?);
        match &self.signer {
            Some(signer) => signer.sign_attestation(Attestation::new(body, Level::L2)),
            None => Ok(Attestation::new(body, Level::L1)),
        }
    }

    fn handle_sealed(&self, event: &WindowSealedEvent) {
        let window_id = &event.window.window_id;
        match self.attest(event) {
            Ok(attestation) => {
                let level = attestation.claimed_level;
                self.store.insert(attestation_ref(window_id), attestation);
                debug!(
                    window_id = %window_id,
                    chain_length = event.window.chain.chain_length,
                    level = %level,
                    "stream window attested"
                );
            },
            Err(e) => {
                error!(window_id = %window_id, error = %e, "failed to attest sealed window");
            },
        }
    }
}

#[async_trait::async_trait]
impl EventHandler for AttestationEventSubscriber {
    async fn handle_event(&self, event: WindowEvent) {
        match event {
            WindowEvent::Sealed(sealed) => self.handle_sealed(&sealed),
            WindowEvent::SealFailed(failed) => {
                warn!(
                    window_id = %failed.window_id,
                    error = %failed.error_message,
                    "window seal failed (no attestation created)"
                );
            },
            WindowEvent::RecordDropped(_) => {},
        }
    }
}
