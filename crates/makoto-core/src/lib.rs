//! Core domain models, attestation documents and collaborator capabilities.
//!
//! Provides strongly-typed primitives (digests, levels, window identifiers),
//! the in-toto statement and DBOM document model, the capability traits the
//! integrity engine and chain verifier consume, window events and the clock
//! abstraction. All other Makoto crates depend on these foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod attestation;
pub mod capabilities;
pub mod duration;
pub mod error;
pub mod events;
pub mod models;
pub mod time;

pub use attestation::{
    Attestation, AttestationBody, AttestationKind, AttestationRef, Dbom, DigestSet,
    EnvelopeSignature, InputReference, LineageInput, MerkleProofDocument, Predicate, Statement,
    StreamWindowPredicate, Subject, WindowDescriptor,
};
pub use capabilities::{
    AttestationResolver, CollaboratorError, CollaboratorResult, SchemaValidator,
    SignatureVerifier, WindowSink, WindowStore,
};
pub use error::{CoreError, Result};
pub use events::{
    EventHandler, MulticastEventHandler, NoOpEventHandler, RecordDroppedEvent, WindowEvent,
    WindowSealFailedEvent, WindowSealedEvent,
};
pub use models::{
    ChainLink, Digest, HashAlgorithm, Level, SealedWindow, StreamId, TreeHead, WindowId,
    WindowKind,
};
pub use time::{Clock, RealClock, TestClock};
