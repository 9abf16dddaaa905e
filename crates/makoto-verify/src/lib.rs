//! Lineage verification for Makoto attestations.
//!
//! [`ChainVerifier`] takes a root attestation (a transform statement, a DBOM
//! or a stream window statement) and verifies it together with every
//! attestation it transitively depends on:
//!
//! 1. **Resolve** - fetch referenced inputs through the injected resolver,
//!    siblings concurrently, each under a deadline
//! 2. **Check** - signatures of L2/L3 claims, digests of resolved inputs,
//!    stream window chain links and sample proofs
//! 3. **Aggregate** - weakest level across the graph, rejecting cycles
//!
//! The outcome is always a [`VerificationResult`]; collaborator failures are
//! recorded as issues and never returned as errors.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use makoto_core::{Attestation, RealClock};
//! use makoto_integrity::{Ed25519SignatureVerifier, MemoryAttestationStore};
//! use makoto_verify::{ChainVerifier, VerifierConfig};
//!
//! # async fn example(root: Attestation, keys: Ed25519SignatureVerifier) {
//! let verifier = ChainVerifier::new(VerifierConfig::default(), Arc::new(RealClock::new()));
//! let store = Arc::new(MemoryAttestationStore::new());
//! let result = verifier.verify(&root, store, Arc::new(keys)).await;
//! println!("valid: {}, level: {:?}", result.valid, result.level);
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod result;
pub mod verifier;

pub use config::{UnknownInputPolicy, VerifierConfig};
pub use error::{IssueCategory, IssueKind, Result, VerifyError};
pub use result::{Phase, VerificationIssue, VerificationResult};
pub use verifier::{ChainVerifier, Collaborators};

/// Default deadline for one resolver call, in milliseconds.
pub const DEFAULT_RESOLVE_TIMEOUT_MS: u64 = 5_000;

/// Default maximum number of attestations in one lineage graph.
pub const DEFAULT_MAX_NODES: usize = 1_024;
