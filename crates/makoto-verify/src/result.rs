//! Structured verification results.

use std::fmt;

use chrono::{DateTime, Utc};
use makoto_core::Level;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{IssueCategory, IssueKind};

/// Phase of a verification run.
///
/// Runs move `Pending → Resolving → Verifying` and end in `Verified` or
/// `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Not started.
    Pending,
    /// Fetching the lineage graph.
    Resolving,
    /// Checking signatures, windows and levels.
    Verifying,
    /// Finished and valid.
    Verified,
    /// Finished and invalid, or cancelled.
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Resolving => write!(f, "resolving"),
            Self::Verifying => write!(f, "verifying"),
            Self::Verified => write!(f, "verified"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One problem found during verification, with the node it concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationIssue {
    /// Issue kind.
    pub kind: IssueKind,
    /// Subject name or reference of the offending node.
    pub subject: String,
    /// Human-readable detail.
    pub message: String,
}

impl VerificationIssue {
    /// Creates an issue.
    pub fn new(kind: IssueKind, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind, subject: subject.into(), message: message.into() }
    }

    /// Returns the issue category.
    pub fn category(&self) -> IssueCategory {
        self.kind.category()
    }
}

impl fmt::Display for VerificationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.subject, self.message)
    }
}

/// Outcome of verifying one attestation and its lineage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    /// Identifier of the run.
    pub run_id: Uuid,
    /// True if no fatal issue was found.
    pub valid: bool,
    /// Weakest verified level across the lineage, or `None` for below L1.
    pub level: Option<Level>,
    /// Final phase.
    pub phase: Phase,
    /// Issues affecting the outcome.
    pub errors: Vec<VerificationIssue>,
    /// Informational issues.
    pub warnings: Vec<VerificationIssue>,
    /// Distinct attestations verified.
    pub nodes_verified: usize,
    /// When the run finished.
    pub verified_at: DateTime<Utc>,
}

impl VerificationResult {
    /// Returns true if an error or warning of `kind` was recorded.
    pub fn has_issue(&self, kind: IssueKind) -> bool {
        self.issues(kind).next().is_some()
    }

    /// Returns every error and warning of `kind`.
    pub fn issues(&self, kind: IssueKind) -> impl Iterator<Item = &VerificationIssue> {
        self.errors.iter().chain(&self.warnings).filter(move |issue| issue.kind == kind)
    }

    /// Returns the distinct error kinds, in first-seen order.
    pub fn error_kinds(&self) -> Vec<IssueKind> {
        let mut kinds = Vec::new();
        for issue in &self.errors {
            if !kinds.contains(&issue.kind) {
                kinds.push(issue.kind);
            }
        }
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(errors: Vec<VerificationIssue>) -> VerificationResult {
        VerificationResult {
            run_id: Uuid::new_v4(),
            valid: errors.is_empty(),
            level: Some(Level::L1),
            phase: Phase::Verified,
            errors,
            warnings: vec![VerificationIssue::new(IssueKind::UnattestedInput, "t", "raw feed")],
            nodes_verified: 1,
            verified_at: Utc::now(),
        }
    }

    #[test]
    fn lookups_cover_errors_and_warnings() {
        let result = result_with(vec![
            VerificationIssue::new(IssueKind::DigestMismatch, "a", "x"),
            VerificationIssue::new(IssueKind::DigestMismatch, "b", "y"),
            VerificationIssue::new(IssueKind::LineageCycle, "a", "z"),
        ]);
        assert!(result.has_issue(IssueKind::UnattestedInput));
        assert_eq!(result.issues(IssueKind::DigestMismatch).count(), 2);
        assert_eq!(
            result.error_kinds(),
            vec![IssueKind::DigestMismatch, IssueKind::LineageCycle]
        );
    }

    #[test]
    fn issue_display_names_kind_and_subject() {
        let issue =
            VerificationIssue::new(IssueKind::SignatureInvalid, "dataset:x", "no valid key");
        assert_eq!(issue.to_string(), "[signature_invalid] dataset:x: no valid key");
    }
}
