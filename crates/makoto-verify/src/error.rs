//! Error and issue classification for lineage verification.
//!
//! Verification itself never fails with an error: problems found in the
//! lineage graph are recorded as issues on the result. [`VerifyError`] only
//! covers misuse of the API, such as an invalid configuration.

use std::fmt;

use makoto_integrity::IntegrityError;
use serde::Serialize;
use thiserror::Error;

/// Errors raised when setting up verification.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Configuration values are invalid.
    #[error("invalid verifier configuration: {message}")]
    Configuration {
        /// What is wrong.
        message: String,
    },
}

impl VerifyError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }
}

/// Result type alias for verifier setup.
pub type Result<T> = std::result::Result<T, VerifyError>;

/// Kind of problem found in a lineage graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// An L2/L3 claim carries no valid signature.
    SignatureInvalid,
    /// An attested input could not be fetched.
    UnresolvedInput,
    /// An input declares no attestation reference.
    UnattestedInput,
    /// A consumer declares a higher level for an input than it verified at.
    OverstatedLevel,
    /// A resolved document was rejected by the schema validator.
    SchemaInvalid,
    /// The lineage graph contains a cycle.
    LineageCycle,
    /// A resolved document does not carry the digest its consumer expects.
    DigestMismatch,
    /// A stream window's chain link disagrees with stored state.
    BrokenChainLink,
    /// A stream window links to a window that was never stored.
    UnknownPreviousWindow,
    /// A sample inclusion proof does not reach the attested root.
    ProofMismatch,
    /// A sample inclusion proof is structurally invalid.
    MalformedProof,
    /// A Merkle tree height does not fit its leaf count.
    TreeShapeMismatch,
    /// A stream window attests zero records.
    EmptyWindow,
    /// A collaborator failed while checking a node.
    CollaboratorFailure,
    /// The lineage graph exceeds the configured node limit.
    NodeLimitExceeded,
    /// The run was cancelled before it finished.
    Cancelled,
}

impl IssueKind {
    /// Returns the category deciding how the issue affects validity.
    pub const fn category(self) -> IssueCategory {
        match self {
            Self::MalformedProof | Self::EmptyWindow | Self::NodeLimitExceeded => {
                IssueCategory::Input
            },
            Self::LineageCycle
            | Self::DigestMismatch
            | Self::BrokenChainLink
            | Self::UnknownPreviousWindow
            | Self::ProofMismatch
            | Self::TreeShapeMismatch => IssueCategory::Integrity,
            Self::SignatureInvalid
            | Self::UnresolvedInput
            | Self::UnattestedInput
            | Self::OverstatedLevel
            | Self::SchemaInvalid => IssueCategory::Policy,
            Self::CollaboratorFailure => IssueCategory::Collaborator,
            Self::Cancelled => IssueCategory::Aborted,
        }
    }

    /// Returns true if the issue is reported as a warning rather than an
    /// error.
    pub const fn is_warning(self) -> bool {
        matches!(self, Self::UnattestedInput | Self::OverstatedLevel)
    }

    /// Maps an integrity failure raised while checking a stream window.
    pub fn from_integrity(error: &IntegrityError) -> Self {
        match error {
            IntegrityError::UnknownPreviousWindow { .. } => Self::UnknownPreviousWindow,
            IntegrityError::BrokenChainLink { .. } => Self::BrokenChainLink,
            IntegrityError::Store { .. } => Self::CollaboratorFailure,
            IntegrityError::EmptyInput => Self::EmptyWindow,
            IntegrityError::IndexOutOfRange { .. } => Self::ProofMismatch,
            IntegrityError::MalformedProof { .. }
            | IntegrityError::InvalidLeaf { .. }
            | IntegrityError::InvalidKeyFormat { .. }
            | IntegrityError::InvalidSignature { .. }
            | IntegrityError::Core(_) => Self::MalformedProof,
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SignatureInvalid => "signature_invalid",
            Self::UnresolvedInput => "unresolved_input",
            Self::UnattestedInput => "unattested_input",
            Self::OverstatedLevel => "overstated_level",
            Self::SchemaInvalid => "schema_invalid",
            Self::LineageCycle => "lineage_cycle",
            Self::DigestMismatch => "digest_mismatch",
            Self::BrokenChainLink => "broken_chain_link",
            Self::UnknownPreviousWindow => "unknown_previous_window",
            Self::ProofMismatch => "proof_mismatch",
            Self::MalformedProof => "malformed_proof",
            Self::TreeShapeMismatch => "tree_shape_mismatch",
            Self::EmptyWindow => "empty_window",
            Self::CollaboratorFailure => "collaborator_failure",
            Self::NodeLimitExceeded => "node_limit_exceeded",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Issue categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    /// Malformed or out-of-bounds input.
    Input,
    /// Stored or attested state contradicts a claim.
    Integrity,
    /// A weak link that degrades the achieved level.
    Policy,
    /// A collaborator could not perform a check.
    Collaborator,
    /// The run did not complete.
    Aborted,
}

impl IssueCategory {
    /// Returns true if an issue of this category fails verification.
    ///
    /// Policy and collaborator issues only degrade the level unless strict
    /// mode is requested.
    pub const fn is_fatal(self, strict: bool) -> bool {
        match self {
            Self::Input | Self::Integrity | Self::Aborted => true,
            Self::Policy | Self::Collaborator => strict,
        }
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Integrity => write!(f, "integrity"),
            Self::Policy => write!(f, "policy"),
            Self::Collaborator => write!(f, "collaborator"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}
