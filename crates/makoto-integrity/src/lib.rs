//! Merkle trees, inclusion proofs, window chaining and DSSE signing.
//!
//! Builds deterministic binary Merkle trees over window leaves, produces and
//! verifies inclusion proofs independently of the tree, links consecutive
//! windows of a stream into a tamper-evident chain, and signs and verifies
//! attestation envelopes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chain;
pub mod error;
pub mod event_subscriber;
pub mod hasher;
pub mod merkle;
pub mod proof;
pub mod signing;
pub mod store;

pub use chain::ChainLinker;
pub use error::{IntegrityError, Result};
pub use event_subscriber::{attestation_ref, stream_window_statement, AttestationEventSubscriber};
pub use merkle::{MerkleTree, DEFAULT_PARALLEL_THRESHOLD};
pub use proof::{verify_document, verify_proof, MerkleProof, ProofStep, Side};
pub use signing::{Ed25519SignatureVerifier, EnvelopeSigner};
pub use store::{MemoryAttestationStore, MemoryWindowStore};
