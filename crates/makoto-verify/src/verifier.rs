//! Attestation chain verification.
//!
//! A run first resolves the whole lineage graph breadth-first, fetching
//! sibling inputs concurrently with a deadline per fetch. It then checks
//! every distinct attestation once (signatures, stream window chain links
//! and sample proofs) and walks the graph depth-first to aggregate the
//! weakest level and detect cycles.
//!
//! A node is keyed by attestation kind, subject digest and a fingerprint of
//! the signed document. An ancestor shared by several consumers is fetched
//! and checked once per run, while a DBOM and the transform producing its
//! dataset, or two differently signed documents for one artifact, stay
//! separate nodes.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use makoto_core::{
    attestation::StreamWindowPredicate, Attestation, AttestationBody, AttestationRef,
    AttestationResolver, Clock, CollaboratorError, HashAlgorithm, Level, LineageInput, Predicate,
    SchemaValidator, SignatureVerifier, Statement, WindowId, WindowStore,
};
use makoto_integrity::{hasher, merkle::expected_height, verify_document, ChainLinker};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::{UnknownInputPolicy, VerifierConfig},
    error::IssueKind,
    result::{Phase, VerificationIssue, VerificationResult},
};

/// Collaborators consulted during verification.
#[derive(Debug, Clone)]
pub struct Collaborators {
    /// Fetches referenced attestations.
    pub resolver: Arc<dyn AttestationResolver>,
    /// Checks signatures of L2/L3 claims.
    pub signatures: Arc<dyn SignatureVerifier>,
    /// Validates resolved documents, if set.
    pub schema: Option<Arc<dyn SchemaValidator>>,
    /// Sealed windows to check stream window chain links against, if set.
    pub window_store: Option<Arc<dyn WindowStore>>,
}

impl Collaborators {
    /// Creates collaborators without schema validation or window store.
    pub fn new(
        resolver: Arc<dyn AttestationResolver>,
        signatures: Arc<dyn SignatureVerifier>,
    ) -> Self {
        Self { resolver, signatures, schema: None, window_store: None }
    }
}

/// Verifies attestations and their lineage.
#[derive(Debug, Clone)]
pub struct ChainVerifier {
    config: VerifierConfig,
    clock: Arc<dyn Clock>,
}

impl ChainVerifier {
    /// Creates a verifier.
    pub fn new(config: VerifierConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Verifies `root` and everything it transitively depends on.
    pub async fn verify(
        &self,
        root: &Attestation,
        resolver: Arc<dyn AttestationResolver>,
        signatures: Arc<dyn SignatureVerifier>,
    ) -> VerificationResult {
        let collaborators = Collaborators::new(resolver, signatures);
        self.verify_with(root, &collaborators, &CancellationToken::new()).await
    }

    /// Verifies `root` with the given collaborators.
    ///
    /// The shape of `root` itself is assumed to be validated already; only
    /// resolved documents go through the schema validator. Cancelling
    /// `cancel` ends the run with a `Cancelled` issue.
    pub async fn verify_with(
        &self,
        root: &Attestation,
        collaborators: &Collaborators,
        cancel: &CancellationToken,
    ) -> VerificationResult {
        let mut run = Run::new(&self.config, collaborators);
        info!(run_id = %run.id, subject = %subject_name(root), "verification started");

        let root_key = run.resolve(root, cancel).await;
        let level = match root_key {
            Some(root_key) => run.verify(&root_key, cancel).await,
            None => None,
        };
        run.finish(level, self.clock.now_utc())
    }
}

type NodeKey = String;

#[derive(Debug, Clone)]
enum Edge {
    Resolved { key: NodeKey, name: String, declared: Option<Level> },
    Unknown,
}

#[derive(Debug)]
struct Node {
    attestation: Attestation,
    edges: Vec<Edge>,
}

#[derive(Debug)]
enum FetchOutcome {
    Found(Attestation),
    NotFound,
    Failed(CollaboratorError),
}

#[derive(Debug, Clone, Copy)]
enum Visit {
    InProgress,
    Done(Option<Level>),
}

struct Run<'a> {
    id: Uuid,
    config: &'a VerifierConfig,
    collaborators: &'a Collaborators,
    phase: Phase,
    nodes: BTreeMap<NodeKey, Node>,
    fetched: HashMap<AttestationRef, Option<NodeKey>>,
    assessed: usize,
    errors: Vec<VerificationIssue>,
    warnings: Vec<VerificationIssue>,
}

impl<'a> Run<'a> {
    fn new(config: &'a VerifierConfig, collaborators: &'a Collaborators) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            collaborators,
            phase: Phase::Pending,
            nodes: BTreeMap::new(),
            fetched: HashMap::new(),
            assessed: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn record(&mut self, issue: VerificationIssue) {
        debug!(
            run_id = %self.id,
            kind = %issue.kind,
            subject = %issue.subject,
            message = %issue.message,
            "verification issue"
        );
        if issue.kind.is_warning() {
            self.warnings.push(issue);
        } else {
            self.errors.push(issue);
        }
    }

    fn cancelled(&mut self) {
        warn!(run_id = %self.id, phase = %self.phase, "verification cancelled");
        self.record(VerificationIssue::new(
            IssueKind::Cancelled,
            "run",
            format!("cancelled while {}", self.phase),
        ));
    }

    /// Builds the lineage graph level by level. Returns the root key, or
    /// `None` if the run was cancelled.
    async fn resolve(&mut self, root: &Attestation, cancel: &CancellationToken) -> Option<NodeKey> {
        self.phase = Phase::Resolving;
        let root_key = node_key(root, None);
        let mut pending: Vec<(NodeKey, LineageInput)> =
            root.inputs().into_iter().map(|input| (root_key.clone(), input)).collect();
        self.nodes.insert(root_key.clone(), Node { attestation: root.clone(), edges: Vec::new() });

        while !pending.is_empty() {
            let mut seen = HashSet::new();
            let wanted: Vec<AttestationRef> = pending
                .iter()
                .filter_map(|(_, input)| input.attestation_ref.clone())
                .filter(|reference| !self.fetched.contains_key(reference))
                .filter(|reference| seen.insert(reference.clone()))
                .collect();

            let collaborators = self.collaborators;
            let resolver = collaborators.resolver.as_ref();
            let timeout = self.config.resolve_timeout();
            let fetches = join_all(
                wanted.into_iter().map(|reference| fetch(resolver, reference, timeout)),
            );
            let outcomes = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                outcomes = fetches => Some(outcomes),
            };
            let Some(outcomes) = outcomes else {
                self.cancelled();
                return None;
            };

            let mut next = Vec::new();
            for (reference, outcome) in outcomes {
                let key = self.admit(&reference, outcome, &mut next);
                self.fetched.insert(reference, key);
            }
            for (parent, input) in pending {
                let edge = self.edge_for(&input);
                if let Some(node) = self.nodes.get_mut(&parent) {
                    node.edges.push(edge);
                }
            }
            pending = next;
        }

        debug!(run_id = %self.id, nodes = self.nodes.len(), "lineage graph resolved");
        Some(root_key)
    }

    /// Adds a fetched attestation to the graph and queues its inputs.
    fn admit(
        &mut self,
        reference: &AttestationRef,
        outcome: FetchOutcome,
        next: &mut Vec<(NodeKey, LineageInput)>,
    ) -> Option<NodeKey> {
        let attestation = match outcome {
            FetchOutcome::Found(attestation) => attestation,
            FetchOutcome::NotFound => {
                self.record(VerificationIssue::new(
                    IssueKind::UnresolvedInput,
                    reference.as_str(),
                    "attestation not found",
                ));
                return None;
            },
            FetchOutcome::Failed(error) => {
                self.record(VerificationIssue::new(
                    IssueKind::UnresolvedInput,
                    reference.as_str(),
                    error.to_string(),
                ));
                return None;
            },
        };

        if let Some(schema) = &self.collaborators.schema {
            match schema.validate(&attestation) {
                Ok(true) => {},
                Ok(false) => {
                    self.record(VerificationIssue::new(
                        IssueKind::SchemaInvalid,
                        reference.as_str(),
                        "document rejected by schema validator",
                    ));
                    return None;
                },
                Err(error) => {
                    self.record(VerificationIssue::new(
                        IssueKind::CollaboratorFailure,
                        reference.as_str(),
                        format!("schema validation failed: {error}"),
                    ));
                    return None;
                },
            }
        }

        let key = node_key(&attestation, Some(reference));
        if self.nodes.contains_key(&key) {
            return Some(key);
        }
        if self.nodes.len() >= self.config.max_nodes() {
            if !self.errors.iter().any(|issue| issue.kind == IssueKind::NodeLimitExceeded) {
                self.record(VerificationIssue::new(
                    IssueKind::NodeLimitExceeded,
                    reference.as_str(),
                    format!("lineage graph exceeds {} attestations", self.config.max_nodes()),
                ));
            }
            return None;
        }

        next.extend(attestation.inputs().into_iter().map(|input| (key.clone(), input)));
        self.nodes.insert(key.clone(), Node { attestation, edges: Vec::new() });
        Some(key)
    }

    fn edge_for(&mut self, input: &LineageInput) -> Edge {
        let Some(reference) = &input.attestation_ref else {
            self.record(VerificationIssue::new(
                IssueKind::UnattestedInput,
                input.name.as_str(),
                "input has no attestation reference",
            ));
            return Edge::Unknown;
        };
        let Some(key) = self.fetched.get(reference).cloned().flatten() else {
            return Edge::Unknown;
        };

        if let (Some(expected), Some(node)) = (&input.digest, self.nodes.get(&key)) {
            if !node.attestation.body.subject_digest().matches(expected) {
                let issue = VerificationIssue::new(
                    IssueKind::DigestMismatch,
                    input.name.as_str(),
                    format!("{reference} does not attest the expected digest"),
                );
                self.record(issue);
            }
        }
        Edge::Resolved { key, name: input.name.clone(), declared: input.declared_level }
    }

    /// Checks every node and aggregates the root's level.
    async fn verify(&mut self, root_key: &NodeKey, cancel: &CancellationToken) -> Option<Level> {
        self.phase = Phase::Verifying;

        let collaborators = self.collaborators;
        let assessments = join_all(
            self.nodes
                .iter()
                .map(|(key, node)| assess(key.clone(), &node.attestation, collaborators)),
        );
        let assessments = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            assessments = assessments => Some(assessments),
        };
        let Some(assessments) = assessments else {
            self.cancelled();
            return None;
        };

        self.assessed = assessments.len();
        let mut own_levels = HashMap::new();
        for (key, level, issues) in assessments {
            own_levels.insert(key, level);
            for issue in issues {
                self.record(issue);
            }
        }

        let mut aggregator = Aggregator {
            nodes: &self.nodes,
            own_levels: &own_levels,
            policy: self.config.unknown_input_policy(),
            visits: HashMap::new(),
            issues: Vec::new(),
        };
        let level = aggregator.level_of(root_key);
        let issues = std::mem::take(&mut aggregator.issues);
        for issue in issues {
            self.record(issue);
        }
        level
    }

    fn finish(mut self, level: Option<Level>, verified_at: DateTime<Utc>) -> VerificationResult {
        let strict = self.config.strict();
        let fatal = self.errors.iter().any(|issue| issue.category().is_fatal(strict));
        let valid = !fatal && (!strict || level.is_some());
        self.phase = if valid { Phase::Verified } else { Phase::Failed };

        info!(
            run_id = %self.id,
            valid,
            level = ?level,
            nodes = self.assessed,
            errors = self.errors.len(),
            warnings = self.warnings.len(),
            "verification finished"
        );

        VerificationResult {
            run_id: self.id,
            valid,
            level,
            phase: self.phase,
            errors: self.errors,
            warnings: self.warnings,
            nodes_verified: self.assessed,
            verified_at,
        }
    }
}

/// Depth-first weakest-link aggregation with cycle detection.
struct Aggregator<'a> {
    nodes: &'a BTreeMap<NodeKey, Node>,
    own_levels: &'a HashMap<NodeKey, Level>,
    policy: UnknownInputPolicy,
    visits: HashMap<&'a str, Visit>,
    issues: Vec<VerificationIssue>,
}

impl<'a> Aggregator<'a> {
    fn level_of(&mut self, key: &'a str) -> Option<Level> {
        match self.visits.get(key) {
            Some(Visit::Done(level)) => return *level,
            Some(Visit::InProgress) => {
                let subject = self
                    .nodes
                    .get(key)
                    .map_or_else(|| key.to_string(), |node| subject_name(&node.attestation));
                self.issues.push(VerificationIssue::new(
                    IssueKind::LineageCycle,
                    subject,
                    "attestation is its own ancestor",
                ));
                return None;
            },
            None => {},
        }

        let nodes = self.nodes;
        let node = nodes.get(key)?;
        self.visits.insert(key, Visit::InProgress);

        let mut level = self.own_levels.get(key).copied();
        for edge in &node.edges {
            let contribution = match edge {
                Edge::Resolved { key: child, name, declared } => {
                    let achieved = self.level_of(child);
                    let finished = matches!(self.visits.get(child.as_str()), Some(Visit::Done(_)));
                    if let (true, Some(declared)) = (finished, declared) {
                        if achieved.map_or(true, |achieved| *declared > achieved) {
                            self.issues.push(VerificationIssue::new(
                                IssueKind::OverstatedLevel,
                                name.as_str(),
                                format!("declared {declared}, verified {}", level_name(achieved)),
                            ));
                        }
                    }
                    Some(achieved)
                },
                Edge::Unknown => match self.policy {
                    UnknownInputPolicy::BelowL1 => Some(None),
                    UnknownInputPolicy::TreatAsL1 => Some(Some(Level::L1)),
                    UnknownInputPolicy::Exclude => None,
                },
            };
            if let Some(contribution) = contribution {
                level = weakest(level, contribution);
            }
        }

        self.visits.insert(key, Visit::Done(level));
        level
    }
}

fn level_name(level: Option<Level>) -> String {
    level.map_or_else(|| "below L1".to_string(), |level| level.to_string())
}

fn weakest(a: Option<Level>, b: Option<Level>) -> Option<Level> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        _ => None,
    }
}

async fn fetch(
    resolver: &dyn AttestationResolver,
    reference: AttestationRef,
    timeout: Duration,
) -> (AttestationRef, FetchOutcome) {
    let outcome = match tokio::time::timeout(timeout, resolver.fetch(&reference)).await {
        Ok(Ok(Some(attestation))) => FetchOutcome::Found(attestation),
        Ok(Ok(None)) => FetchOutcome::NotFound,
        Ok(Err(error)) => FetchOutcome::Failed(error),
        Err(_elapsed) => FetchOutcome::Failed(CollaboratorError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    };
    debug!(reference = %reference, outcome = ?outcome_name(&outcome), "attestation fetched");
    (reference, outcome)
}

fn outcome_name(outcome: &FetchOutcome) -> &'static str {
    match outcome {
        FetchOutcome::Found(_) => "found",
        FetchOutcome::NotFound => "not_found",
        FetchOutcome::Failed(_) => "failed",
    }
}

/// Computes a node's own level and the issues found on it.
async fn assess(
    key: NodeKey,
    attestation: &Attestation,
    collaborators: &Collaborators,
) -> (NodeKey, Level, Vec<VerificationIssue>) {
    let subject = subject_name(attestation);
    let mut issues = Vec::new();
    let mut level = attestation.claimed_level;

    if level.requires_signature() {
        match collaborators.signatures.verify(attestation).await {
            Ok(true) => {},
            Ok(false) => {
                issues.push(VerificationIssue::new(
                    IssueKind::SignatureInvalid,
                    subject.as_str(),
                    format!("{level} claim has no valid signature, capped at L1"),
                ));
                level = Level::L1;
            },
            Err(error) => {
                issues.push(VerificationIssue::new(
                    IssueKind::CollaboratorFailure,
                    subject.as_str(),
                    format!("signature verification failed: {error}, capped at L1"),
                ));
                level = Level::L1;
            },
        }
    }

    if let AttestationBody::Statement(statement) = &attestation.body {
        if let Predicate::StreamWindow(window) = statement.predicate() {
            check_stream_window(
                &subject,
                statement,
                window,
                collaborators.window_store.as_ref(),
                &mut issues,
            )
            .await;
        }
    }

    (key, level, issues)
}

async fn check_stream_window(
    subject: &str,
    statement: &Statement,
    window: &StreamWindowPredicate,
    store: Option<&Arc<dyn WindowStore>>,
    issues: &mut Vec<VerificationIssue>,
) {
    let tree = &window.integrity.merkle_tree;
    let mut issue = |kind: IssueKind, message: String| {
        issues.push(VerificationIssue::new(kind, subject, message));
    };

    if tree.leaf_count == 0 {
        issue(IssueKind::EmptyWindow, "window attests zero records".to_string());
    } else if let Some(height) = tree.tree_height {
        let expected = expected_height(tree.leaf_count);
        if height != expected {
            issue(
                IssueKind::TreeShapeMismatch,
                format!(
                    "height {height} does not fit {} leaves (expected {expected})",
                    tree.leaf_count
                ),
            );
        }
    }

    if let Some(subject_root) = &statement.primary_subject().digest.merkle_root {
        if !subject_root.eq_ignore_ascii_case(&tree.root.to_hex()) {
            issue(
                IssueKind::DigestMismatch,
                "subject merkle root differs from the attested tree root".to_string(),
            );
        }
    }

    if let Some(verification) = &window.verification {
        for document in &verification.sample_proofs {
            if document.leaf_index >= tree.leaf_count {
                issue(
                    IssueKind::ProofMismatch,
                    format!(
                        "sample proof for leaf {} beyond {} leaves",
                        document.leaf_index, tree.leaf_count
                    ),
                );
                continue;
            }
            match verify_document(document, &tree.root, tree.algorithm) {
                Ok(true) => {},
                Ok(false) => issue(
                    IssueKind::ProofMismatch,
                    format!(
                        "sample proof for leaf {} does not reach the root",
                        document.leaf_index
                    ),
                ),
                Err(e) => issue(IssueKind::MalformedProof, e.to_string()),
            }
        }
    }

    let Some(link) = &window.integrity.chain else {
        return;
    };
    if !link.is_well_formed() {
        issue(
            IssueKind::BrokenChainLink,
            format!("malformed chain link of length {}", link.chain_length),
        );
        return;
    }
    let Some(store) = store else {
        return;
    };
    let window_id = match statement.primary_subject().name.parse::<WindowId>() {
        Ok(window_id) => window_id,
        Err(e) => {
            issue(IssueKind::BrokenChainLink, format!("subject is not a window id: {e}"));
            return;
        },
    };

    match store.get(&window_id).await {
        Ok(Some(stored)) if stored.tree.root != tree.root => issue(
            IssueKind::BrokenChainLink,
            format!("attested root {} differs from stored root {}", tree.root, stored.tree.root),
        ),
        Ok(_) => {},
        Err(e) => {
            issue(IssueKind::CollaboratorFailure, format!("window store failed: {e}"));
            return;
        },
    }

    if let Err(e) = ChainLinker::new(store.clone()).check(&window_id, link).await {
        issue(IssueKind::from_integrity(&e), e.to_string());
    }
}

fn node_key(attestation: &Attestation, reference: Option<&AttestationRef>) -> NodeKey {
    let identity = attestation.identity().unwrap_or_else(|| match reference {
        Some(reference) => format!("ref:{reference}"),
        None => "root".to_string(),
    });
    format!("{}:{identity}#{}", attestation.kind(), fingerprint(attestation, reference))
}

/// Digest over the signed body, the claimed level and the signatures.
fn fingerprint(attestation: &Attestation, reference: Option<&AttestationRef>) -> String {
    let mut bytes = match attestation.canonical_payload() {
        Ok(payload) => payload,
        Err(_) => reference.map(|r| r.as_str().as_bytes().to_vec()).unwrap_or_default(),
    };
    bytes.push(0);
    bytes.extend_from_slice(attestation.claimed_level.to_string().as_bytes());
    for signature in &attestation.signatures {
        bytes.push(0);
        bytes.extend_from_slice(signature.keyid.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(signature.sig.as_bytes());
    }
    hasher::digest(HashAlgorithm::Sha256, &bytes).to_hex()
}

fn subject_name(attestation: &Attestation) -> String {
    match &attestation.body {
        AttestationBody::Statement(statement) => statement.primary_subject().name.clone(),
        AttestationBody::Dbom(dbom) => dbom.dbom_id.clone(),
    }
}
