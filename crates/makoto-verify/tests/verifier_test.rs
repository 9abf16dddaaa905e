//! Lineage verification against in-memory attestation graphs.

use std::{sync::Arc, time::Duration};

use makoto_core::{Level, TestClock};
use makoto_integrity::{Ed25519SignatureVerifier, EnvelopeSigner};
use makoto_testing::{
    digest_of, fixtures::fixture_time, origin, reference, DbomBuilder, FailingResolver, Lineage,
    RecordingResolver, SlowResolver, StaticSchemaValidator, StaticSignatureVerifier,
    TransformBuilder,
};
use makoto_verify::{
    ChainVerifier, Collaborators, IssueKind, Phase, UnknownInputPolicy, VerificationResult,
    VerifierConfig,
};
use tokio_util::sync::CancellationToken;

fn verifier(strict: bool, policy: UnknownInputPolicy) -> ChainVerifier {
    let config = VerifierConfig::new(strict, policy, Duration::from_secs(2), 64).unwrap();
    ChainVerifier::new(config, Arc::new(TestClock::starting_at(fixture_time())))
}

fn lenient() -> ChainVerifier {
    verifier(false, UnknownInputPolicy::BelowL1)
}

async fn verify_in(
    verifier: &ChainVerifier,
    lineage: &Lineage,
    root: &makoto_core::Attestation,
) -> VerificationResult {
    verifier
        .verify(root, lineage.store(), Arc::new(StaticSignatureVerifier::always_valid()))
        .await
}

#[tokio::test]
async fn dbom_level_is_weakest_source() {
    let lineage = Lineage::new();
    lineage.add("source-a", origin("source-a", Level::L2));
    lineage.add("source-b", origin("source-b", Level::L1));
    lineage.add("source-c", origin("source-c", Level::L3));
    let dbom = DbomBuilder::new("dataset")
        .level(Level::L3)
        .source("source-a", Some(Level::L2))
        .source("source-b", Some(Level::L1))
        .source("source-c", Some(Level::L3));
    assert_eq!(dbom.clone().build_dbom().calculate_overall_level(), Some(Level::L1));

    let result = verify_in(&lenient(), &lineage, &dbom.build()).await;

    assert!(result.valid, "errors: {:?}", result.errors);
    assert_eq!(result.level, Some(Level::L1));
    assert_eq!(result.phase, Phase::Verified);
    assert_eq!(result.nodes_verified, 4);
    assert!(result.errors.is_empty());
    assert_eq!(result.verified_at, fixture_time());
}

#[tokio::test]
async fn mutual_references_are_a_lineage_cycle() {
    let lineage = Lineage::new();
    let a = lineage.add("a", TransformBuilder::new("a").input("b").build());
    lineage.add("b", TransformBuilder::new("b").input("a").build());

    let result = verify_in(&lenient(), &lineage, &a).await;

    assert!(!result.valid);
    assert_eq!(result.phase, Phase::Failed);
    assert!(result.has_issue(IssueKind::LineageCycle));
    assert_eq!(result.nodes_verified, 2);
}

#[tokio::test]
async fn invalid_signature_caps_node_at_l1_without_failing() {
    let lineage = Lineage::new();
    lineage.add("raw", origin("raw", Level::L3));
    let root = TransformBuilder::new("clean").level(Level::L3).input("raw").build();
    let signatures = Arc::new(StaticSignatureVerifier::always_invalid());

    let result = lenient().verify(&root, lineage.store(), signatures.clone()).await;

    assert!(result.valid);
    assert_eq!(result.level, Some(Level::L1));
    assert_eq!(result.issues(IssueKind::SignatureInvalid).count(), 2);
    assert_eq!(signatures.calls(), 2);

    let strict = verifier(true, UnknownInputPolicy::BelowL1)
        .verify(&root, lineage.store(), Arc::new(StaticSignatureVerifier::always_invalid()))
        .await;
    assert!(!strict.valid);
}

#[tokio::test]
async fn l1_claims_skip_signature_checks() {
    let lineage = Lineage::new();
    lineage.add("raw", origin("raw", Level::L1));
    let root = TransformBuilder::new("clean").input("raw").build();
    let signatures = Arc::new(StaticSignatureVerifier::always_invalid());

    let result = lenient().verify(&root, lineage.store(), signatures.clone()).await;

    assert!(result.valid);
    assert_eq!(result.level, Some(Level::L1));
    assert_eq!(signatures.calls(), 0);
}

#[tokio::test]
async fn failing_signature_service_is_a_collaborator_failure() {
    let lineage = Lineage::new();
    let root = TransformBuilder::new("clean").level(Level::L2).build();

    let result = lenient()
        .verify(&root, lineage.store(), Arc::new(StaticSignatureVerifier::failing()))
        .await;

    assert!(result.valid);
    assert_eq!(result.level, Some(Level::L1));
    assert!(result.has_issue(IssueKind::CollaboratorFailure));
}

fn root_with_missing_input(lineage: &Lineage) -> makoto_core::Attestation {
    lineage.add("raw", origin("raw", Level::L2));
    TransformBuilder::new("clean").level(Level::L2).input("raw").input("missing").build()
}

#[tokio::test]
async fn unresolved_input_counts_below_l1_by_default() {
    let lineage = Lineage::new();
    let root = root_with_missing_input(&lineage);

    let result = verify_in(&lenient(), &lineage, &root).await;

    assert!(result.valid);
    assert_eq!(result.level, None);
    let unresolved: Vec<_> = result.issues(IssueKind::UnresolvedInput).collect();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].subject, reference("missing").as_str());
}

#[tokio::test]
async fn unresolved_input_policy_decides_aggregate() {
    let lineage = Lineage::new();
    let root = root_with_missing_input(&lineage);

    let as_l1 = verify_in(&verifier(false, UnknownInputPolicy::TreatAsL1), &lineage, &root).await;
    assert_eq!(as_l1.level, Some(Level::L1));

    let excluded = verify_in(&verifier(false, UnknownInputPolicy::Exclude), &lineage, &root).await;
    assert_eq!(excluded.level, Some(Level::L2));
    assert!(excluded.has_issue(IssueKind::UnresolvedInput));
}

#[tokio::test]
async fn strict_mode_fails_on_unresolved_input() {
    let lineage = Lineage::new();
    let root = root_with_missing_input(&lineage);

    for policy in [UnknownInputPolicy::BelowL1, UnknownInputPolicy::Exclude] {
        let result = verify_in(&verifier(true, policy), &lineage, &root).await;
        assert!(!result.valid, "{policy:?} should fail in strict mode");
        assert_eq!(result.phase, Phase::Failed);
    }
}

#[tokio::test]
async fn unattested_input_is_a_warning() {
    let lineage = Lineage::new();
    lineage.add("raw", origin("raw", Level::L2));
    let root = TransformBuilder::new("clean")
        .level(Level::L2)
        .input("raw")
        .unattested_input("feed")
        .build();

    let result = verify_in(&verifier(false, UnknownInputPolicy::Exclude), &lineage, &root).await;

    assert!(result.valid);
    assert!(result.errors.is_empty());
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].kind, IssueKind::UnattestedInput);
    assert_eq!(result.level, Some(Level::L2));
}

#[tokio::test]
async fn slow_resolver_times_out_into_unresolved_input() {
    let lineage = Lineage::new();
    lineage.add("fast", origin("fast", Level::L2));
    lineage.add("slow", origin("slow", Level::L2));
    let root = TransformBuilder::new("clean").level(Level::L2).input("fast").input("slow").build();
    let resolver = Arc::new(SlowResolver::new(
        lineage.store(),
        vec![reference("slow")],
        Duration::from_secs(30),
    ));
    let config =
        VerifierConfig::new(false, UnknownInputPolicy::TreatAsL1, Duration::from_millis(50), 64)
            .unwrap();
    let verifier = ChainVerifier::new(config, Arc::new(TestClock::new()));

    let started = std::time::Instant::now();
    let result =
        verifier.verify(&root, resolver, Arc::new(StaticSignatureVerifier::always_valid())).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    let unresolved: Vec<_> = result.issues(IssueKind::UnresolvedInput).collect();
    assert_eq!(unresolved.len(), 1);
    assert!(unresolved[0].message.contains("timed out"), "{}", unresolved[0].message);
    assert_eq!(result.level, Some(Level::L1));
    assert_eq!(result.nodes_verified, 2);
}

#[tokio::test]
async fn resolver_failures_are_unresolved_inputs() {
    let root = TransformBuilder::new("clean").input("raw").build();

    let result = lenient()
        .verify(&root, Arc::new(FailingResolver), Arc::new(StaticSignatureVerifier::always_valid()))
        .await;

    assert!(result.has_issue(IssueKind::UnresolvedInput));
    assert_eq!(result.level, None);
    assert_eq!(result.nodes_verified, 1);
}

#[tokio::test]
async fn shared_ancestor_is_fetched_and_checked_once() {
    let lineage = Lineage::new();
    lineage.add("base", origin("base", Level::L2));
    lineage.add("left", TransformBuilder::new("left").level(Level::L2).input("base").build());
    lineage.add("right", TransformBuilder::new("right").level(Level::L2).input("base").build());
    let root = TransformBuilder::new("top").level(Level::L2).input("left").input("right").build();
    let resolver = Arc::new(RecordingResolver::new(lineage.store()));
    let signatures = Arc::new(StaticSignatureVerifier::always_valid());

    let result = lenient().verify(&root, resolver.clone(), signatures.clone()).await;

    assert!(result.valid, "errors: {:?}", result.errors);
    assert_eq!(result.level, Some(Level::L2));
    assert_eq!(resolver.fetch_count(&reference("base")), 1);
    assert_eq!(resolver.total_fetches(), 3);
    assert_eq!(signatures.calls(), 4);
    assert_eq!(result.nodes_verified, 4);
}

#[tokio::test]
async fn resolved_input_with_other_digest_is_a_mismatch() {
    let lineage = Lineage::new();
    lineage.add("raw", origin("raw", Level::L1));
    let root = TransformBuilder::new("clean").input_with_digest("raw", digest_of("forged")).build();

    let result = verify_in(&lenient(), &lineage, &root).await;

    assert!(!result.valid);
    assert_eq!(result.error_kinds(), vec![IssueKind::DigestMismatch]);
}

#[tokio::test]
async fn schema_rejection_leaves_input_unresolved() {
    let lineage = Lineage::new();
    lineage.add("raw", origin("raw", Level::L1));
    let root = TransformBuilder::new("clean").input("raw").build();
    let mut collaborators =
        Collaborators::new(lineage.store(), Arc::new(StaticSignatureVerifier::always_valid()));
    collaborators.schema = Some(Arc::new(StaticSchemaValidator::reject_all()));

    let result =
        lenient().verify_with(&root, &collaborators, &CancellationToken::new()).await;

    assert!(result.has_issue(IssueKind::SchemaInvalid));
    assert_eq!(result.level, None);
    assert_eq!(result.nodes_verified, 1);

    collaborators.schema = Some(Arc::new(StaticSchemaValidator::failing()));
    let result =
        lenient().verify_with(&root, &collaborators, &CancellationToken::new()).await;
    assert!(result.has_issue(IssueKind::CollaboratorFailure));

    collaborators.schema = Some(Arc::new(StaticSchemaValidator::accept_all()));
    let result =
        lenient().verify_with(&root, &collaborators, &CancellationToken::new()).await;
    assert!(result.valid);
    assert_eq!(result.level, Some(Level::L1));
}

#[tokio::test]
async fn cancelled_run_reports_failure() {
    let lineage = Lineage::new();
    lineage.add("raw", origin("raw", Level::L1));
    let root = TransformBuilder::new("clean").input("raw").build();
    let collaborators =
        Collaborators::new(lineage.store(), Arc::new(StaticSignatureVerifier::always_valid()));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = lenient().verify_with(&root, &collaborators, &cancel).await;

    assert!(!result.valid);
    assert_eq!(result.phase, Phase::Failed);
    assert_eq!(result.error_kinds(), vec![IssueKind::Cancelled]);
    assert_eq!(result.nodes_verified, 0);
}

#[tokio::test]
async fn oversized_lineage_is_rejected() {
    let lineage = Lineage::new();
    lineage.add("c", origin("c", Level::L1));
    lineage.add("b", TransformBuilder::new("b").input("c").build());
    lineage.add("a", TransformBuilder::new("a").input("b").build());
    let root = TransformBuilder::new("root").input("a").build();
    let config =
        VerifierConfig::new(false, UnknownInputPolicy::Exclude, Duration::from_secs(1), 2).unwrap();
    let verifier = ChainVerifier::new(config, Arc::new(TestClock::new()));

    let result = verify_in(&verifier, &lineage, &root).await;

    assert!(!result.valid);
    assert!(result.has_issue(IssueKind::NodeLimitExceeded));
    assert_eq!(result.nodes_verified, 2);
}

#[tokio::test]
async fn repeated_runs_are_deterministic() {
    let lineage = Lineage::new();
    lineage.add("raw", origin("raw", Level::L2));
    let root = TransformBuilder::new("clean").level(Level::L3).input("raw").input("gone").build();
    let verifier = verifier(false, UnknownInputPolicy::TreatAsL1);

    let first = verify_in(&verifier, &lineage, &root).await;
    let second = verify_in(&verifier, &lineage, &root).await;

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.level, second.level);
    assert_eq!(first.errors, second.errors);
    assert_eq!(first.valid, second.valid);
}

#[tokio::test]
async fn dbom_and_the_transform_producing_its_dataset_are_distinct_nodes() {
    let lineage = Lineage::new();
    lineage.add("raw", origin("raw", Level::L1));
    lineage.add("step", TransformBuilder::new("dataset").input("raw").build());
    let dbom = DbomBuilder::new("dataset")
        .source("raw", Some(Level::L1))
        .transformation("step", Some(Level::L1))
        .build();

    let result = verify_in(&lenient(), &lineage, &dbom).await;

    assert!(result.valid, "errors: {:?}", result.errors);
    assert!(!result.has_issue(IssueKind::LineageCycle));
    assert_eq!(result.level, Some(Level::L1));
    assert_eq!(result.nodes_verified, 3);
}

#[tokio::test]
async fn unsigned_copy_of_a_signed_artifact_is_checked_on_its_own() {
    let signer = Arc::new(EnvelopeSigner::ephemeral());
    let lineage = Lineage::signed_by(signer.clone());
    lineage.add("a", origin("x", Level::L3));
    lineage.store().insert(reference("b"), origin("x", Level::L3));
    let root = lineage.sign(
        TransformBuilder::new("report")
            .level(Level::L3)
            .input_ref("signed", digest_of("x"), reference("a"))
            .input_ref("unsigned", digest_of("x"), reference("b"))
            .build(),
    );
    let signatures = Arc::new(Ed25519SignatureVerifier::new([signer.verifying_key()]));

    let result = lenient().verify(&root, lineage.store(), signatures).await;

    assert!(result.valid);
    assert_eq!(result.error_kinds(), vec![IssueKind::SignatureInvalid]);
    assert_eq!(result.level, Some(Level::L1));
    assert_eq!(result.nodes_verified, 3);
}

#[tokio::test]
async fn overstated_input_level_is_a_warning() {
    let lineage = Lineage::new();
    lineage.add("raw", origin("raw", Level::L1));
    let dbom = DbomBuilder::new("dataset").source("raw", Some(Level::L3)).build();

    let result = verify_in(&lenient(), &lineage, &dbom).await;

    assert!(result.valid);
    assert!(result.errors.is_empty());
    assert_eq!(result.level, Some(Level::L1));
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].kind, IssueKind::OverstatedLevel);
    assert_eq!(result.warnings[0].subject, "raw");
}
