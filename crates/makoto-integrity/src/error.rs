//! Error types for tree construction, proofs, chaining and signing.
//!
//! Variants fall into three groups: input errors (empty window, index out of
//! range, malformed proof), integrity errors (broken or unknown chain links)
//! and collaborator failures surfaced from the window store.

use makoto_core::{CollaboratorError, CoreError, WindowId};

/// Errors raised by integrity operations.
#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    /// A Merkle tree was requested over zero leaves.
    #[error("cannot build a Merkle tree from an empty leaf sequence")]
    EmptyInput,

    /// A leaf digest does not match the tree's algorithm.
    #[error("leaf {index} is {len} bytes, expected {expected}")]
    InvalidLeaf {
        /// Position of the offending leaf.
        index: usize,
        /// Actual digest length.
        len: usize,
        /// Length required by the algorithm.
        expected: usize,
    },

    /// Proof requested for a leaf that does not exist.
    #[error("leaf index {index} out of range for tree of {leaf_count} leaves")]
    IndexOutOfRange {
        /// Requested index.
        index: u64,
        /// Number of leaves in the tree.
        leaf_count: u64,
    },

    /// Proof is structurally invalid.
    #[error("malformed proof: {reason}")]
    MalformedProof {
        /// What is wrong with the proof.
        reason: String,
    },

    /// The previous window of a link was never persisted.
    #[error("unknown previous window {window_id}")]
    UnknownPreviousWindow {
        /// Window that could not be found.
        window_id: WindowId,
    },

    /// A chain link does not agree with stored state.
    #[error("broken chain link at {window_id}: {reason}")]
    BrokenChainLink {
        /// Window whose link is broken.
        window_id: WindowId,
        /// What does not match.
        reason: String,
    },

    /// The window store failed.
    #[error("window store error: {source}")]
    Store {
        /// Collaborator failure.
        #[from]
        source: CollaboratorError,
    },

    /// Key bytes could not be decoded.
    #[error("invalid key format: {message}")]
    InvalidKeyFormat {
        /// Decoding failure.
        message: String,
    },

    /// Signature bytes could not be decoded.
    #[error("invalid signature encoding: {message}")]
    InvalidSignature {
        /// Decoding failure.
        message: String,
    },

    /// Domain value or document error.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl IntegrityError {
    /// Creates a malformed proof error.
    pub fn malformed_proof(reason: impl Into<String>) -> Self {
        Self::MalformedProof { reason: reason.into() }
    }

    /// Creates a broken chain link error.
    pub fn broken_chain_link(window_id: WindowId, reason: impl Into<String>) -> Self {
        Self::BrokenChainLink { window_id, reason: reason.into() }
    }

    /// Returns true if the caller supplied invalid input.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyInput
                | Self::InvalidLeaf { .. }
                | Self::IndexOutOfRange { .. }
                | Self::MalformedProof { .. }
                | Self::InvalidKeyFormat { .. }
                | Self::InvalidSignature { .. }
                | Self::Core(_)
        )
    }

    /// Returns true if stored state contradicts the claim being checked.
    pub fn is_integrity_error(&self) -> bool {
        matches!(self, Self::UnknownPreviousWindow { .. } | Self::BrokenChainLink { .. })
    }

    /// Returns true if retrying may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store { source } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Result type alias for integrity operations.
pub type Result<T> = std::result::Result<T, IntegrityError>;
