//! Verifier configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VerifyError};

/// How inputs of unknown level count towards the aggregate level.
///
/// An input is unknown when it has no attestation reference, or when its
/// attestation could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownInputPolicy {
    /// The input counts as below L1, so the aggregate has no level.
    #[default]
    BelowL1,
    /// The input counts as L1.
    TreatAsL1,
    /// The input is left out of the aggregate.
    Exclude,
}

/// Immutable verifier configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifierConfig {
    strict: bool,
    unknown_input_policy: UnknownInputPolicy,
    resolve_timeout: Duration,
    max_nodes: usize,
}

impl VerifierConfig {
    /// Creates a verifier configuration.
    ///
    /// In strict mode any policy or collaborator issue fails verification,
    /// as does an aggregate below L1.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::Configuration` for a zero resolve timeout or a
    /// zero node limit.
    pub fn new(
        strict: bool,
        unknown_input_policy: UnknownInputPolicy,
        resolve_timeout: Duration,
        max_nodes: usize,
    ) -> Result<Self> {
        if resolve_timeout.is_zero() {
            return Err(VerifyError::configuration("resolve timeout must be positive"));
        }
        if max_nodes == 0 {
            return Err(VerifyError::configuration("node limit must be at least 1"));
        }
        Ok(Self { strict, unknown_input_policy, resolve_timeout, max_nodes })
    }

    /// Returns true in strict mode.
    pub fn strict(&self) -> bool {
        self.strict
    }

    /// Returns the unknown input policy.
    pub fn unknown_input_policy(&self) -> UnknownInputPolicy {
        self.unknown_input_policy
    }

    /// Returns the deadline for each resolver call.
    pub fn resolve_timeout(&self) -> Duration {
        self.resolve_timeout
    }

    /// Returns the maximum number of attestations in one lineage graph.
    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            strict: false,
            unknown_input_policy: UnknownInputPolicy::default(),
            resolve_timeout: Duration::from_millis(crate::DEFAULT_RESOLVE_TIMEOUT_MS),
            max_nodes: crate::DEFAULT_MAX_NODES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_counts_unknown_inputs_below_l1() {
        let config = VerifierConfig::default();
        assert_eq!(config.unknown_input_policy(), UnknownInputPolicy::BelowL1);
        assert!(!config.strict());
    }

    #[test]
    fn rejects_degenerate_limits() {
        let timeout = Duration::from_secs(1);
        let exclude = UnknownInputPolicy::Exclude;
        assert!(VerifierConfig::new(false, exclude, Duration::ZERO, 8).is_err());
        assert!(VerifierConfig::new(false, UnknownInputPolicy::Exclude, timeout, 0).is_err());
        assert!(VerifierConfig::new(true, UnknownInputPolicy::TreatAsL1, timeout, 1).is_ok());
    }

    #[test]
    fn policy_uses_snake_case_names() {
        let policy: UnknownInputPolicy = serde_json::from_str("\"treat_as_l1\"").unwrap();
        assert_eq!(policy, UnknownInputPolicy::TreatAsL1);
        assert_eq!(serde_json::to_string(&UnknownInputPolicy::BelowL1).unwrap(), "\"below_l1\"");
    }
}
