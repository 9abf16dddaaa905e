//! Error types for domain primitives and attestation documents.
//!
//! Every variant is an input error: a value that failed to parse or a
//! document that violates a structural rule. Codes let callers distinguish
//! failures without matching on message text.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while constructing or decoding core domain values.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Digest bytes were empty, too long or not valid hex (E1001).
    #[error("[E1001] Invalid digest: {reason}")]
    InvalidDigest {
        /// Why the digest was rejected.
        reason: String,
    },

    /// Hash algorithm name is not supported (E1002).
    #[error("[E1002] Unsupported hash algorithm: {name}")]
    UnsupportedAlgorithm {
        /// Algorithm name as it appeared in the input.
        name: String,
    },

    /// Window identifier could not be parsed (E1003).
    #[error("[E1003] Invalid window id: {value}")]
    InvalidWindowId {
        /// Raw identifier text.
        value: String,
    },

    /// ISO 8601 duration could not be parsed or is not positive (E1004).
    #[error("[E1004] Invalid duration {value:?}: {reason}")]
    InvalidDuration {
        /// Raw duration text.
        value: String,
        /// Why the duration was rejected.
        reason: String,
    },

    /// Statement `_type` is not in-toto Statement v1 (E1005).
    #[error("[E1005] Unsupported statement type: {statement_type}")]
    UnsupportedStatementType {
        /// The `_type` value found.
        statement_type: String,
    },

    /// Predicate type is not one of the Makoto predicates (E1006).
    #[error("[E1006] Unsupported predicate type: {predicate_type}")]
    UnsupportedPredicate {
        /// The `predicateType` value found.
        predicate_type: String,
    },

    /// Document violates a structural rule (E1007).
    #[error("[E1007] Invalid document: {reason}")]
    InvalidDocument {
        /// Rule that was violated.
        reason: String,
    },

    /// JSON encoding or decoding failed (E1008).
    #[error("[E1008] Serialization error: {source}")]
    Serialization {
        /// Underlying serde error.
        #[from]
        source: serde_json::Error,
    },
}

impl CoreError {
    /// Creates an invalid digest error.
    pub fn invalid_digest(reason: impl Into<String>) -> Self {
        Self::InvalidDigest { reason: reason.into() }
    }

    /// Creates an invalid duration error.
    pub fn invalid_duration(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDuration { value: value.into(), reason: reason.into() }
    }

    /// Creates an invalid document error.
    pub fn invalid_document(reason: impl Into<String>) -> Self {
        Self::InvalidDocument { reason: reason.into() }
    }

    /// Returns the stable error code (E1001-E1008).
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidDigest { .. } => "E1001",
            Self::UnsupportedAlgorithm { .. } => "E1002",
            Self::InvalidWindowId { .. } => "E1003",
            Self::InvalidDuration { .. } => "E1004",
            Self::UnsupportedStatementType { .. } => "E1005",
            Self::UnsupportedPredicate { .. } => "E1006",
            Self::InvalidDocument { .. } => "E1007",
            Self::Serialization { .. } => "E1008",
        }
    }
}
