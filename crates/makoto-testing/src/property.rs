//! Proptest configuration and strategies shared across crates.

use makoto_core::{Digest, HashAlgorithm, Level};
use makoto_integrity::hasher;
use proptest::{prelude::*, test_runner::Config as ProptestConfig};

/// Creates property test configuration based on environment.
///
/// Uses environment variables:
/// - `PROPTEST_CASES`: Number of test cases (default: 20 for dev, 100 for CI)
/// - `CI`: If set to "true", uses CI configuration
pub fn proptest_config() -> ProptestConfig {
    let is_ci = std::env::var("CI").unwrap_or_default() == "true";
    let default_cases = if is_ci { 100 } else { 20 };

    let cases =
        std::env::var("PROPTEST_CASES").ok().and_then(|s| s.parse().ok()).unwrap_or(default_cases);

    ProptestConfig::with_cases(cases)
}

/// Any supported hash algorithm.
pub fn arb_algorithm() -> impl Strategy<Value = HashAlgorithm> {
    prop_oneof![
        Just(HashAlgorithm::Sha256),
        Just(HashAlgorithm::Sha384),
        Just(HashAlgorithm::Sha512),
        Just(HashAlgorithm::Blake3),
    ]
}

/// Any assurance level.
pub fn arb_level() -> impl Strategy<Value = Level> {
    prop_oneof![Just(Level::L1), Just(Level::L2), Just(Level::L3)]
}

/// Between 1 and `max` record payloads of up to 64 bytes.
pub fn arb_payloads(max: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..=max.max(1))
}

/// Algorithm plus between 1 and `max` leaf digests under it.
pub fn arb_leaves(max: usize) -> impl Strategy<Value = (HashAlgorithm, Vec<Digest>)> {
    (arb_algorithm(), arb_payloads(max)).prop_map(|(algorithm, payloads)| {
        let leaves = payloads.iter().map(|p| hasher::leaf_hash(algorithm, p)).collect();
        (algorithm, leaves)
    })
}

/// Event time offsets in milliseconds within `[0, span_ms)`.
pub fn arb_event_offsets(span_ms: i64, max: usize) -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0..span_ms.max(1), 1..=max.max(1))
}
