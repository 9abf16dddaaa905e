//! Capabilities the integrity core requires from its collaborators.
//!
//! Resolvers, signature verifiers, schema validators and window stores are
//! injected as trait objects. Their failures are reported as
//! [`CollaboratorError`] and mapped into typed issues at the call site; they
//! never escape into core logic as collaborator-specific errors.

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    attestation::{Attestation, AttestationRef},
    models::{SealedWindow, WindowId},
};

/// Result type for collaborator calls.
pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// Failure reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// The collaborator could not be reached or failed internally.
    #[error("collaborator unavailable: {message}")]
    Unavailable {
        /// Error description.
        message: String,
    },

    /// The collaborator refused the request.
    #[error("collaborator rejected request: {message}")]
    Rejected {
        /// Reason for rejection.
        message: String,
    },

    /// The call exceeded its deadline.
    #[error("collaborator timed out after {timeout_ms}ms")]
    Timeout {
        /// Deadline in milliseconds.
        timeout_ms: u64,
    },
}

impl CollaboratorError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into() }
    }

    /// Creates a rejected error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected { message: message.into() }
    }

    /// Returns true if retrying the call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

/// Fetches attestations by reference.
#[async_trait]
pub trait AttestationResolver: Send + Sync + std::fmt::Debug {
    /// Returns the referenced attestation, or `None` if it does not exist.
    async fn fetch(&self, reference: &AttestationRef) -> CollaboratorResult<Option<Attestation>>;
}

/// Checks attestation signatures.
#[async_trait]
pub trait SignatureVerifier: Send + Sync + std::fmt::Debug {
    /// Returns true if at least one signature on the attestation is valid
    /// for a trusted key.
    async fn verify(&self, attestation: &Attestation) -> CollaboratorResult<bool>;
}

/// Checks attestation documents against their schema.
pub trait SchemaValidator: Send + Sync + std::fmt::Debug {
    /// Returns true if the document conforms.
    fn validate(&self, attestation: &Attestation) -> CollaboratorResult<bool>;
}

/// Read-only access to sealed windows.
#[async_trait]
pub trait WindowStore: Send + Sync + std::fmt::Debug {
    /// Returns the sealed window, or `None` if it was never persisted.
    async fn get(&self, window_id: &WindowId) -> CollaboratorResult<Option<SealedWindow>>;
}

/// Append-only persistence for sealed windows.
#[async_trait]
pub trait WindowSink: WindowStore {
    /// Persists a sealed window.
    ///
    /// Returns `CollaboratorError::Rejected` if the window id is already
    /// stored; sealed windows are never overwritten.
    async fn put(&self, window: SealedWindow) -> CollaboratorResult<()>;
}
