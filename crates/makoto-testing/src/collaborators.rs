//! Fake collaborators for deterministic verification tests.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use makoto_core::{
    Attestation, AttestationRef, AttestationResolver, CollaboratorError, CollaboratorResult,
    SchemaValidator, SignatureVerifier,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Accept,
    Reject,
    Fail,
}

/// Signature verifier with a fixed verdict that counts its calls.
#[derive(Debug)]
pub struct StaticSignatureVerifier {
    verdict: Verdict,
    calls: AtomicUsize,
}

impl StaticSignatureVerifier {
    /// Accepts every signature.
    pub fn always_valid() -> Self {
        Self { verdict: Verdict::Accept, calls: AtomicUsize::new(0) }
    }

    /// Rejects every signature.
    pub fn always_invalid() -> Self {
        Self { verdict: Verdict::Reject, calls: AtomicUsize::new(0) }
    }

    /// Fails every call as unavailable.
    pub fn failing() -> Self {
        Self { verdict: Verdict::Fail, calls: AtomicUsize::new(0) }
    }

    /// Returns the number of verify calls made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignatureVerifier for StaticSignatureVerifier {
    async fn verify(&self, _attestation: &Attestation) -> CollaboratorResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.verdict {
            Verdict::Accept => Ok(true),
            Verdict::Reject => Ok(false),
            Verdict::Fail => Err(CollaboratorError::unavailable("signature service down")),
        }
    }
}

/// Resolver wrapper counting fetches per reference.
#[derive(Debug)]
pub struct RecordingResolver {
    inner: Arc<dyn AttestationResolver>,
    fetches: DashMap<AttestationRef, usize>,
}

impl RecordingResolver {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn AttestationResolver>) -> Self {
        Self { inner, fetches: DashMap::new() }
    }

    /// Returns how often `reference` was fetched.
    pub fn fetch_count(&self, reference: &AttestationRef) -> usize {
        self.fetches.get(reference).map_or(0, |count| *count)
    }

    /// Returns the total number of fetches.
    pub fn total_fetches(&self) -> usize {
        self.fetches.iter().map(|entry| *entry.value()).sum()
    }
}

#[async_trait]
impl AttestationResolver for RecordingResolver {
    async fn fetch(&self, reference: &AttestationRef) -> CollaboratorResult<Option<Attestation>> {
        *self.fetches.entry(reference.clone()).or_insert(0) += 1;
        self.inner.fetch(reference).await
    }
}

/// Resolver that delays selected references before delegating.
#[derive(Debug)]
pub struct SlowResolver {
    inner: Arc<dyn AttestationResolver>,
    slow: Vec<AttestationRef>,
    delay: Duration,
}

impl SlowResolver {
    /// Delays fetches of the `slow` references by `delay`.
    pub fn new(
        inner: Arc<dyn AttestationResolver>,
        slow: Vec<AttestationRef>,
        delay: Duration,
    ) -> Self {
        Self { inner, slow, delay }
    }
}

#[async_trait]
impl AttestationResolver for SlowResolver {
    async fn fetch(&self, reference: &AttestationRef) -> CollaboratorResult<Option<Attestation>> {
        if self.slow.contains(reference) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.fetch(reference).await
    }
}

/// Resolver whose every fetch fails as unavailable.
#[derive(Debug, Default)]
pub struct FailingResolver;

#[async_trait]
impl AttestationResolver for FailingResolver {
    async fn fetch(&self, reference: &AttestationRef) -> CollaboratorResult<Option<Attestation>> {
        Err(CollaboratorError::unavailable(format!("registry unreachable for {reference}")))
    }
}

/// Schema validator with a fixed verdict.
#[derive(Debug)]
pub struct StaticSchemaValidator {
    verdict: Verdict,
}

impl StaticSchemaValidator {
    /// Accepts every document.
    pub fn accept_all() -> Self {
        Self { verdict: Verdict::Accept }
    }

    /// Rejects every document.
    pub fn reject_all() -> Self {
        Self { verdict: Verdict::Reject }
    }

    /// Fails every call.
    pub fn failing() -> Self {
        Self { verdict: Verdict::Fail }
    }
}

impl SchemaValidator for StaticSchemaValidator {
    fn validate(&self, _attestation: &Attestation) -> CollaboratorResult<bool> {
        match self.verdict {
            Verdict::Accept => Ok(true),
            Verdict::Reject => Ok(false),
            Verdict::Fail => Err(CollaboratorError::unavailable("schema registry down")),
        }
    }
}
