//! Property tests for core value types.

use chrono::{DateTime, Duration, Utc};
use makoto_core::{duration, Digest, DigestSet, HashAlgorithm, Level, StreamId, WindowId};
use proptest::{prelude::*, test_runner::Config as ProptestConfig};

fn proptest_config() -> ProptestConfig {
    let is_ci = std::env::var("CI").unwrap_or_default() == "true";
    let default_cases = if is_ci { 100 } else { 20 };
    let cases =
        std::env::var("PROPTEST_CASES").ok().and_then(|s| s.parse().ok()).unwrap_or(default_cases);
    ProptestConfig::with_cases(cases)
}

fn arb_level() -> impl Strategy<Value = Level> {
    prop_oneof![Just(Level::L1), Just(Level::L2), Just(Level::L3)]
}

fn instant(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + Duration::milliseconds(millis)
}

proptest! {
    #![proptest_config(proptest_config())]

    #[test]
    fn formatted_durations_parse_back(millis in 1_i64..10_000_000_000) {
        let original = Duration::milliseconds(millis);
        let text = duration::format(original);
        prop_assert_eq!(duration::parse(&text).unwrap(), original, "{}", text);
    }

    #[test]
    fn window_ids_survive_display(
        stream in "[a-z][a-z0-9@._-]{0,16}",
        start in 0_i64..4_000_000_000_000,
        length in 1_i64..86_400_000,
    ) {
        let id = WindowId::new(StreamId::new(stream), instant(start), instant(start + length))
            .unwrap();
        let parsed: WindowId = id.to_string().parse().unwrap();
        prop_assert_eq!(parsed, id);
    }

    #[test]
    fn weakest_level_is_the_minimum(levels in prop::collection::vec(arb_level(), 0..8)) {
        let expected = levels.iter().copied().min();
        prop_assert_eq!(Level::weakest(levels), expected);
    }

    #[test]
    fn digest_sets_match_themselves_in_any_case(bytes in prop::array::uniform32(any::<u8>())) {
        let digest = Digest::from(bytes);
        let lower = DigestSet::of(HashAlgorithm::Sha256, &digest);
        let upper = DigestSet::sha256(digest.to_hex().to_ascii_uppercase());
        prop_assert!(lower.matches(&upper));
        prop_assert_eq!(lower.identity(), upper.identity());
    }

    #[test]
    fn digests_differing_in_one_byte_do_not_match(
        bytes in prop::array::uniform32(any::<u8>()),
        index in 0_usize..32,
    ) {
        let mut flipped = bytes;
        flipped[index] ^= 0x01;
        let a = DigestSet::of(HashAlgorithm::Sha256, &Digest::from(bytes));
        let b = DigestSet::of(HashAlgorithm::Sha256, &Digest::from(flipped));
        prop_assert!(!a.matches(&b));
    }
}
